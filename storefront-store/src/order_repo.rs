use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use storefront_core::repository::RepositoryError;
use storefront_order::{Order, OrderFilter, OrderRepository};
use uuid::Uuid;

/// Postgres-backed order records: key columns for lookups, the full order as JSONB.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one(&self, sql: &str, key: &str) -> Result<Option<Order>, RepositoryError> {
        let row: Option<(Json<Order>,)> = sqlx::query_as(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|(Json(order),)| order))
    }
}

fn backend(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(db.message().to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => RepositoryError::Corrupt(err.to_string()),
        _ => RepositoryError::Backend(err.to_string()),
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, status, customer_email, payment_reference, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.customer.email.expose())
        .bind(order.payment_reference.as_deref())
        .bind(Json(order))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        let row: Option<(Json<Order>,)> = sqlx::query_as("SELECT document FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|(Json(order),)| order))
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        self.fetch_one("SELECT document FROM orders WHERE order_number = $1", order_number)
            .await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, RepositoryError> {
        self.fetch_one("SELECT document FROM orders WHERE payment_reference = $1", reference)
            .await
    }

    async fn update(&self, order: &Order) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_reference = $3, document = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment_reference.as_deref())
        .bind(Json(order))
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(order.id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let rows: Vec<(Json<Order>,)> = sqlx::query_as(
            r#"
            SELECT document FROM orders
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR customer_email = lower($2))
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.email.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(|(Json(order),)| order).collect())
    }
}
