use anyhow::Result;
use billcycle_store::PgStore;
use sqlx::{PgPool, postgres::PgPoolOptions};

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Connects and makes sure the billing tables exist.
pub async fn connect_store(database_url: &str) -> Result<PgStore> {
    let store = PgStore::new(connect_database(database_url).await?);
    store.ensure_schema().await?;
    Ok(store)
}
