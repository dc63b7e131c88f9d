use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Row};

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{Delivery, Item, Order, Payment};
use super::OrderStore;

// ============================================================================
// Postgres Order Store
// ============================================================================
//
// Tables: orders (PK order_uid) -> delivery, payment (surrogate BIGSERIAL
// ids) and items (FK order_uid, BIGSERIAL id preserving insertion order).
//
// ============================================================================

const ORDER_COLUMNS: &str = r#"
    o.order_uid, o.track_number, o.entry, o.locale, o.internal_signature,
    o.customer_id, o.delivery_service, o.shardkey, o.sm_id, o.date_created, o.oof_shard,
    d.name, d.phone, d.zip, d.city, d.address, d.region, d.email,
    p.transaction, p.request_id, p.currency, p.provider, p.amount, p.payment_dt,
    p.bank, p.delivery_cost, p.goods_total, p.custom_fee
"#;

const ITEMS_JSON: &str = r#"
    COALESCE((
        SELECT json_agg(json_build_object(
            'chrt_id', i.chrt_id, 'track_number', i.track_number, 'price', i.price,
            'rid', i.rid, 'name', i.name, 'sale', i.sale, 'size', i.size,
            'total_price', i.total_price, 'nm_id', i.nm_id, 'brand', i.brand,
            'status', i.status
        ) ORDER BY i.id)
        FROM items i
        WHERE i.order_uid = o.order_uid
    ), '[]'::json)::text AS items
"#;

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the pool; fails if the database cannot be reached
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.dbname);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.dbname,
            "Connected to Postgres"
        );

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn write_order(conn: &mut PgConnection, order: &Order) -> Result<(), sqlx::Error> {
        let existing = sqlx::query(
            "SELECT delivery_id, payment_id FROM orders WHERE order_uid = $1 FOR UPDATE",
        )
        .bind(&order.order_uid)
        .fetch_optional(&mut *conn)
        .await?;

        match existing {
            Some(row) => {
                let delivery_id: i64 = row.try_get("delivery_id")?;
                let payment_id: i64 = row.try_get("payment_id")?;

                tracing::debug!(order_uid = %order.order_uid, "Order exists, replacing in place");

                update_delivery(conn, delivery_id, &order.delivery).await?;
                update_payment(conn, payment_id, &order.payment).await?;
                update_order_row(conn, order).await?;

                sqlx::query("DELETE FROM items WHERE order_uid = $1")
                    .bind(&order.order_uid)
                    .execute(&mut *conn)
                    .await?;
            }
            None => {
                let delivery_id = insert_delivery(conn, &order.delivery).await?;
                let payment_id = insert_payment(conn, &order.payment).await?;
                insert_order_row(conn, order, delivery_id, payment_id).await?;
            }
        }

        insert_items(conn, &order.order_uid, &order.items).await
    }

    async fn items_for_order(&self, order_uid: &str) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query(
            "SELECT chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, brand, status
             FROM items
             WHERE order_uid = $1
             ORDER BY id",
        )
        .bind(order_uid)
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(item_from_row).collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(items)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn add_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        match Self::write_order(&mut tx, order).await {
            Ok(()) => {
                tx.commit().await?;
                tracing::debug!(
                    order_uid = %order.order_uid,
                    items = order.items.len(),
                    "Order committed"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(
                        order_uid = %order.order_uid,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn get_order_by_id(&self, id: &str) -> Result<Order, StoreError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS}, {ITEMS_JSON}
             FROM orders o
             JOIN delivery d ON o.delivery_id = d.id
             JOIN payment p ON o.payment_id = p.id
             WHERE o.order_uid = $1"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let items_json: String = row.try_get("items")?;
        let items: Vec<Item> = serde_json::from_str(&items_json)?;

        Ok(order_from_row(&row, items)?)
    }

    async fn count_orders(&self) -> Result<i64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<Order>, StoreError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS}
             FROM orders o
             JOIN delivery d ON o.delivery_id = d.id
             JOIN payment p ON o.payment_id = p.id
             ORDER BY o.order_uid
             LIMIT $1 OFFSET $2"
        );

        let rows = sqlx::query(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let order_uid: String = row.try_get("order_uid")?;
            let items = self.items_for_order(&order_uid).await?;
            orders.push(order_from_row(row, items)?);
        }

        Ok(orders)
    }
}

// ============================================================================
// Row Writers
// ============================================================================

async fn insert_delivery(conn: &mut PgConnection, d: &Delivery) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO delivery (name, phone, zip, city, address, region, email)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id",
    )
    .bind(&d.name)
    .bind(&d.phone)
    .bind(&d.zip)
    .bind(&d.city)
    .bind(&d.address)
    .bind(&d.region)
    .bind(&d.email)
    .fetch_one(&mut *conn)
    .await
}

async fn update_delivery(conn: &mut PgConnection, id: i64, d: &Delivery) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE delivery
         SET name = $2, phone = $3, zip = $4, city = $5, address = $6, region = $7, email = $8
         WHERE id = $1",
    )
    .bind(id)
    .bind(&d.name)
    .bind(&d.phone)
    .bind(&d.zip)
    .bind(&d.city)
    .bind(&d.address)
    .bind(&d.region)
    .bind(&d.email)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_payment(conn: &mut PgConnection, p: &Payment) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO payment (transaction, request_id, currency, provider, amount, payment_dt,
                              bank, delivery_cost, goods_total, custom_fee)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING id",
    )
    .bind(&p.transaction)
    .bind(&p.request_id)
    .bind(&p.currency)
    .bind(&p.provider)
    .bind(p.amount)
    .bind(p.payment_dt)
    .bind(&p.bank)
    .bind(p.delivery_cost)
    .bind(p.goods_total)
    .bind(p.custom_fee)
    .fetch_one(&mut *conn)
    .await
}

async fn update_payment(conn: &mut PgConnection, id: i64, p: &Payment) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE payment
         SET transaction = $2, request_id = $3, currency = $4, provider = $5, amount = $6,
             payment_dt = $7, bank = $8, delivery_cost = $9, goods_total = $10, custom_fee = $11
         WHERE id = $1",
    )
    .bind(id)
    .bind(&p.transaction)
    .bind(&p.request_id)
    .bind(&p.currency)
    .bind(&p.provider)
    .bind(p.amount)
    .bind(p.payment_dt)
    .bind(&p.bank)
    .bind(p.delivery_cost)
    .bind(p.goods_total)
    .bind(p.custom_fee)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_order_row(
    conn: &mut PgConnection,
    o: &Order,
    delivery_id: i64,
    payment_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO orders (order_uid, track_number, entry, delivery_id, payment_id, locale,
                             internal_signature, customer_id, delivery_service, shardkey,
                             sm_id, date_created, oof_shard)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&o.order_uid)
    .bind(&o.track_number)
    .bind(&o.entry)
    .bind(delivery_id)
    .bind(payment_id)
    .bind(&o.locale)
    .bind(&o.internal_signature)
    .bind(&o.customer_id)
    .bind(&o.delivery_service)
    .bind(&o.shard_key)
    .bind(o.sm_id)
    .bind(o.date_created)
    .bind(&o.oof_shard)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_order_row(conn: &mut PgConnection, o: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE orders
         SET track_number = $2, entry = $3, locale = $4, internal_signature = $5,
             customer_id = $6, delivery_service = $7, shardkey = $8, sm_id = $9,
             date_created = $10, oof_shard = $11
         WHERE order_uid = $1",
    )
    .bind(&o.order_uid)
    .bind(&o.track_number)
    .bind(&o.entry)
    .bind(&o.locale)
    .bind(&o.internal_signature)
    .bind(&o.customer_id)
    .bind(&o.delivery_service)
    .bind(&o.shard_key)
    .bind(o.sm_id)
    .bind(o.date_created)
    .bind(&o.oof_shard)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_items(conn: &mut PgConnection, order_uid: &str, items: &[Item]) -> Result<(), sqlx::Error> {
    for item in items {
        sqlx::query(
            "INSERT INTO items (order_uid, chrt_id, track_number, price, rid, name, sale, size,
                                total_price, nm_id, brand, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(order_uid)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// ============================================================================
// Row Readers
// ============================================================================

fn order_from_row(row: &PgRow, items: Vec<Item>) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        delivery: Delivery {
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            zip: row.try_get("zip")?,
            city: row.try_get("city")?,
            address: row.try_get("address")?,
            region: row.try_get("region")?,
            email: row.try_get("email")?,
        },
        payment: Payment {
            transaction: row.try_get("transaction")?,
            request_id: row.try_get("request_id")?,
            currency: row.try_get("currency")?,
            provider: row.try_get("provider")?,
            amount: row.try_get("amount")?,
            payment_dt: row.try_get("payment_dt")?,
            bank: row.try_get("bank")?,
            delivery_cost: row.try_get("delivery_cost")?,
            goods_total: row.try_get("goods_total")?,
            custom_fee: row.try_get("custom_fee")?,
        },
        items,
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shard_key: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_order;
    use std::collections::HashSet;

    // Same layout the deployed schema provides
    const SCHEMA: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS delivery (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL, phone TEXT NOT NULL, zip TEXT NOT NULL, city TEXT NOT NULL,
            address TEXT NOT NULL, region TEXT NOT NULL, email TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS payment (
            id BIGSERIAL PRIMARY KEY,
            transaction TEXT NOT NULL, request_id TEXT NOT NULL, currency TEXT NOT NULL,
            provider TEXT NOT NULL, amount BIGINT NOT NULL, payment_dt BIGINT NOT NULL,
            bank TEXT NOT NULL, delivery_cost BIGINT NOT NULL, goods_total BIGINT NOT NULL,
            custom_fee BIGINT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS orders (
            order_uid TEXT PRIMARY KEY,
            track_number TEXT NOT NULL, entry TEXT NOT NULL,
            delivery_id BIGINT NOT NULL REFERENCES delivery(id),
            payment_id BIGINT NOT NULL REFERENCES payment(id),
            locale TEXT NOT NULL, internal_signature TEXT NOT NULL, customer_id TEXT NOT NULL,
            delivery_service TEXT NOT NULL, shardkey TEXT NOT NULL, sm_id INT NOT NULL,
            date_created TIMESTAMPTZ NOT NULL, oof_shard TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS items (
            id BIGSERIAL PRIMARY KEY,
            order_uid TEXT NOT NULL REFERENCES orders(order_uid),
            chrt_id BIGINT NOT NULL, track_number TEXT NOT NULL, price BIGINT NOT NULL,
            rid TEXT NOT NULL, name TEXT NOT NULL, sale INT NOT NULL, size TEXT NOT NULL,
            total_price BIGINT NOT NULL, nm_id BIGINT NOT NULL, brand TEXT NOT NULL,
            status INT NOT NULL
        )",
    ];

    // Helper to get a store against the test database, if one is configured
    async fn test_store() -> Option<PgOrderStore> {
        let db_url = match std::env::var("DATABASE_URL") {
            Ok(url) if url.starts_with("postgres") => url,
            _ => {
                eprintln!("Skipping test: DATABASE_URL not set or not PostgreSQL");
                return None;
            }
        };

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await
            .unwrap();

        // Tests run in parallel; serialize schema creation
        let mut tx = pool.begin().await.unwrap();
        sqlx::query("SELECT pg_advisory_xact_lock(734001)")
            .execute(&mut *tx)
            .await
            .unwrap();
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await.unwrap();
        }
        tx.commit().await.unwrap();

        Some(PgOrderStore::new(pool))
    }

    /// Unique per run; rows are never deleted so concurrent scans only ever
    /// see rows added, not removed
    fn unique_order(tag: &str) -> Order {
        let uid = format!("pg-{}-{}", tag, uuid::Uuid::now_v7().simple());
        let mut order = sample_order(&uid);
        order.delivery.email = format!("{uid}@example.test");
        order
    }

    async fn row_counts(store: &PgOrderStore, order: &Order) -> (i64, i64, i64) {
        let deliveries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery WHERE email = $1")
            .bind(&order.delivery.email)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment WHERE transaction = $1")
            .bind(&order.payment.transaction)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE order_uid = $1")
            .bind(&order.order_uid)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        (deliveries, payments, items)
    }

    #[tokio::test]
    #[ignore] // Run only when PostgreSQL is available
    async fn test_postgres_add_order_twice_keeps_one_row_set() {
        let Some(store) = test_store().await else { return };
        let order = unique_order("twice");

        store.add_order(&order).await.unwrap();
        let first = row_counts(&store, &order).await;
        assert_eq!(first, (1, 1, order.items.len() as i64));

        store.add_order(&order).await.unwrap();
        assert_eq!(row_counts(&store, &order).await, first);
    }

    #[tokio::test]
    #[ignore]
    async fn test_postgres_redelivery_replaces_in_place() {
        let Some(store) = test_store().await else { return };
        let mut order = unique_order("replace");
        store.add_order(&order).await.unwrap();

        order.delivery.city = "Tel Aviv".to_string();
        order.payment.amount = 4242;
        let mut extra = order.items[0].clone();
        extra.chrt_id = 1;
        order.items.push(extra);
        store.add_order(&order).await.unwrap();

        assert_eq!(row_counts(&store, &order).await, (1, 1, 2));
        assert_eq!(store.get_order_by_id(&order.order_uid).await.unwrap(), order);
    }

    #[tokio::test]
    #[ignore]
    async fn test_postgres_get_order_round_trips_with_item_order() {
        let Some(store) = test_store().await else { return };
        let mut order = unique_order("roundtrip");
        let template = order.items[0].clone();
        order.items = [30, 10, 20]
            .into_iter()
            .map(|chrt_id| Item {
                chrt_id,
                name: format!("item-{chrt_id}"),
                ..template.clone()
            })
            .collect();

        store.add_order(&order).await.unwrap();
        let loaded = store.get_order_by_id(&order.order_uid).await.unwrap();

        assert_eq!(loaded, order);
        let chrt_ids: Vec<i64> = loaded.items.iter().map(|i| i.chrt_id).collect();
        assert_eq!(chrt_ids, vec![30, 10, 20]);
    }

    #[tokio::test]
    #[ignore]
    async fn test_postgres_missing_order_is_not_found() {
        let Some(store) = test_store().await else { return };

        let err = store.get_order_by_id("pg-no-such-order").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    #[ignore]
    async fn test_postgres_fetch_page_covers_all_rows() {
        let Some(store) = test_store().await else { return };
        let mut inserted = Vec::new();
        for _ in 0..3 {
            let order = unique_order("page");
            store.add_order(&order).await.unwrap();
            inserted.push(order);
        }

        let total = store.count_orders().await.unwrap();
        let mut seen = HashSet::new();
        let mut offset = 0;
        loop {
            let page = store.fetch_page(2, offset).await.unwrap();
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;
            for order in page {
                if let Some(expected) = inserted.iter().find(|o| o.order_uid == order.order_uid) {
                    assert_eq!(&order, expected);
                }
                seen.insert(order.order_uid);
            }
        }

        assert!(seen.len() as i64 >= total);
        for order in &inserted {
            assert!(seen.contains(&order.order_uid));
        }
    }
}
