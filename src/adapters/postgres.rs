//! PostgreSQL Record Store Adapter
//!
//! Implements the `RecordStore` port over a deadpool connection pool and a
//! single `products` table. Ids come from a `BIGSERIAL` column and
//! `updated_at` is stamped by the database.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, instrument};

use crate::domain::ports::{Product, ProductDraft, ProductId, RecordStore};
use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS products (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    category    TEXT NOT NULL DEFAULT '',
    stock       INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
    price       DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (price >= 0),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const COLUMNS: &str = "id, name, description, category, stock, price, updated_at";

/// Connection settings for the PostgreSQL record store.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a pooled connection at most this long
    pub timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "catalog".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(5),
        }
    }
}

impl PostgresConfig {
    /// Build a connection pool. Connections are opened lazily.
    pub fn create_pool(&self) -> Result<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size.max(1));
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Config(format!("Failed to create pool: {}", e)))
    }
}

/// PostgreSQL-backed record store.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: Pool,
}

impl PostgresRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &PostgresConfig) -> Result<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create the `products` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await.map_err(db_error)?;
        info!("products table ready");
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::RecordStore(format!("pool: {}", e)))
    }
}

impl std::fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRecordStore")
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

fn db_error(e: tokio_postgres::Error) -> Error {
    Error::RecordStore(e.to_string())
}

fn stock_column(stock: u32) -> Result<i32> {
    i32::try_from(stock)
        .map_err(|_| Error::InvalidProduct(format!("stock {} exceeds column range", stock)))
}

fn row_to_product(row: &Row) -> Result<Product> {
    let stock: i32 = row.try_get("stock").map_err(db_error)?;
    Ok(Product {
        id: ProductId::new(row.try_get("id").map_err(db_error)?),
        name: row.try_get("name").map_err(db_error)?,
        description: row.try_get("description").map_err(db_error)?,
        category: row.try_get("category").map_err(db_error)?,
        stock: u32::try_from(stock)
            .map_err(|_| Error::RecordStore(format!("negative stock {} in row", stock)))?,
        price: row.try_get("price").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self), fields(product_id = %id))]
    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM products WHERE id = $1", COLUMNS),
                &[&id.get()],
            )
            .await
            .map_err(db_error)?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn list(&self) -> Result<Vec<Product>> {
        let client = self.client().await?;
        let rows = client
            .query(&format!("SELECT {} FROM products ORDER BY id", COLUMNS), &[])
            .await
            .map_err(db_error)?;

        debug!("Loaded {} products", rows.len());
        rows.iter().map(row_to_product).collect()
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    async fn create(&self, draft: ProductDraft) -> Result<Product> {
        let stock = stock_column(draft.stock)?;
        let client = self.client().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO products (name, description, category, stock, price) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {}",
                    COLUMNS
                ),
                &[
                    &draft.name,
                    &draft.description,
                    &draft.category,
                    &stock,
                    &draft.price,
                ],
            )
            .await
            .map_err(db_error)?;

        row_to_product(&row)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn update(&self, product: &Product) -> Result<Option<Product>> {
        let stock = stock_column(product.stock)?;
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE products SET name = $2, description = $3, category = $4, \
                     stock = $5, price = $6, updated_at = now() WHERE id = $1 RETURNING {}",
                    COLUMNS
                ),
                &[
                    &product.id.get(),
                    &product.name,
                    &product.description,
                    &product.category,
                    &stock,
                    &product.price,
                ],
            )
            .await
            .map_err(db_error)?;

        row.as_ref().map(row_to_product).transpose()
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn delete(&self, id: ProductId) -> Result<bool> {
        let client = self.client().await?;
        let affected = client
            .execute("DELETE FROM products WHERE id = $1", &[&id.get()])
            .await
            .map_err(db_error)?;
        Ok(affected > 0)
    }

    async fn health_check(&self) -> Result<bool> {
        let client = self.client().await?;
        let row = client.query_one("SELECT 1::INT4", &[]).await.map_err(db_error)?;
        let one: i32 = row.try_get(0).map_err(db_error)?;
        Ok(one == 1)
    }
}
