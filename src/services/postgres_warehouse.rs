//! Postgres warehouse backed by SeaORM
//!
//! Both mutating operations run in a single transaction holding a
//! transaction-scoped advisory lock on the table they replace, so concurrent
//! runs against the same destination are serialized and a failure rolls back
//! to the previous contents.

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::sea_query::{Alias, ColumnDef, Index, IntoTableRef, Query, Table};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    FromQueryResult, Statement, TransactionTrait, Value,
};
use uuid::Uuid;

use crate::error::WarehouseError;
use crate::models::{RatePair, RateQuote};
use crate::services::enrichment::rebuild_select_sql;
use crate::services::warehouse::{
    quote_ident, RebuildPlan, RunLock, SourceProfile, TableRef, Warehouse, CURRENCY_COLUMN,
    DATE_COLUMN, PRICE_COLUMN,
};

const INSERT_CHUNK_SIZE: usize = 1000;

#[derive(Clone)]
pub struct PostgresWarehouse {
    db: DatabaseConnection,
}

#[derive(Debug, FromQueryResult)]
struct ProfileRow {
    total_rows: i64,
    missing_price_rows: i64,
}

#[derive(Debug, FromQueryResult)]
struct PairRow {
    date: NaiveDate,
    currency: String,
}

#[derive(Debug, FromQueryResult)]
struct ColumnRow {
    column_name: String,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    row_count: i64,
}

impl PostgresWarehouse {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> Result<Self, WarehouseError> {
        tracing::info!("Connecting to database...");
        let db = Database::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn sql_table(table: &TableRef) -> sea_orm::sea_query::TableRef {
    match table.schema() {
        Some(schema) => (Alias::new(schema), Alias::new(table.name())).into_table_ref(),
        None => Alias::new(table.name()).into_table_ref(),
    }
}

fn raw(sql: String) -> Statement {
    Statement::from_string(DbBackend::Postgres, sql)
}

/// Serialize writers of `table` until the surrounding transaction ends
async fn lock_table<C: ConnectionTrait>(conn: &C, table: &TableRef) -> Result<(), DbErr> {
    conn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1))",
        vec![Value::from(table.to_string())],
    ))
    .await?;
    Ok(())
}

/// Column names in ordinal order, empty when the table does not exist
async fn table_columns<C: ConnectionTrait>(
    conn: &C,
    table: &TableRef,
) -> Result<Vec<String>, DbErr> {
    let rows = ColumnRow::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        SELECT column_name::text AS column_name
        FROM information_schema.columns
        WHERE table_schema = COALESCE($1, current_schema())
          AND table_name = $2
        ORDER BY ordinal_position
        "#,
        vec![
            Value::from(table.schema().map(str::to_string)),
            Value::from(table.name()),
        ],
    ))
    .all(conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.column_name).collect())
}

/// Columns of a priced table, checked for price, currency and date
async fn priced_columns<C: ConnectionTrait>(
    conn: &C,
    table: &TableRef,
) -> Result<Vec<String>, WarehouseError> {
    let columns = table_columns(conn, table).await?;

    if columns.is_empty() {
        return Err(WarehouseError::TableNotFound(table.to_string()));
    }

    for required in [PRICE_COLUMN, CURRENCY_COLUMN, DATE_COLUMN] {
        if !columns.iter().any(|c| c == required) {
            return Err(WarehouseError::MissingColumn {
                table: table.to_string(),
                column: required.to_string(),
            });
        }
    }

    Ok(columns)
}

/// Run lock backed by an open transaction holding a two-key advisory lock.
///
/// The two-key space is disjoint from the single-key locks taken by
/// `lock_table`, so the run can still write the tables it guards.
struct PgRunLock {
    txn: DatabaseTransaction,
}

#[async_trait]
impl RunLock for PgRunLock {
    async fn release(self: Box<Self>) -> Result<(), WarehouseError> {
        self.txn.commit().await?;
        Ok(())
    }
}

fn create_rate_table(table: &TableRef) -> sea_orm::sea_query::TableCreateStatement {
    Table::create()
        .table(sql_table(table))
        .if_not_exists()
        .col(ColumnDef::new(Alias::new("date")).date().not_null())
        .col(ColumnDef::new(Alias::new("base_currency")).string().not_null())
        .col(ColumnDef::new(Alias::new("target_currency")).string().not_null())
        .col(ColumnDef::new(Alias::new("rate")).double().not_null())
        // One quote per (date, base, target)
        .primary_key(
            Index::create()
                .col(Alias::new("date"))
                .col(Alias::new("base_currency"))
                .col(Alias::new("target_currency")),
        )
        .to_owned()
}

/// Unique sibling name for the table being built
fn staging_table(destination: &TableRef) -> Result<TableRef, WarehouseError> {
    let prefix: String = destination.name().chars().take(40).collect();
    let suffix = Uuid::new_v4().simple().to_string();
    destination.sibling(&format!("{}__rebuild_{}", prefix, &suffix[..12]))
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn lock_run(&self, rates: &TableRef) -> Result<Box<dyn RunLock>, WarehouseError> {
        let txn = self.db.begin().await?;

        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext('fx_normalization'), hashtext($1))",
            vec![Value::from(rates.to_string())],
        ))
        .await?;

        tracing::debug!("Acquired run lock on {}", rates);

        Ok(Box::new(PgRunLock { txn }))
    }

    async fn profile_source(&self, source: &TableRef) -> Result<SourceProfile, WarehouseError> {
        priced_columns(&self.db, source).await?;

        let row = ProfileRow::find_by_statement(raw(format!(
            "SELECT COUNT(*) AS total_rows, \
             COUNT(*) FILTER (WHERE {price} IS NULL) AS missing_price_rows \
             FROM {table}",
            price = quote_ident(PRICE_COLUMN),
            table = source.qualified(),
        )))
        .one(&self.db)
        .await?;

        Ok(row
            .map(|r| SourceProfile {
                total_rows: r.total_rows.max(0) as u64,
                missing_price_rows: r.missing_price_rows.max(0) as u64,
            })
            .unwrap_or_default())
    }

    async fn distinct_rate_pairs(
        &self,
        source: &TableRef,
    ) -> Result<Vec<RatePair>, WarehouseError> {
        priced_columns(&self.db, source).await?;

        let rows = PairRow::find_by_statement(raw(format!(
            "SELECT DISTINCT \
                 CAST({date} AS DATE) AS date, \
                 UPPER(TRIM({currency})) AS currency \
             FROM {table} \
             WHERE {price} IS NOT NULL \
               AND {date} IS NOT NULL \
               AND {currency} IS NOT NULL \
               AND TRIM({currency}) <> '' \
             ORDER BY 1, 2",
            date = quote_ident(DATE_COLUMN),
            currency = quote_ident(CURRENCY_COLUMN),
            price = quote_ident(PRICE_COLUMN),
            table = source.qualified(),
        )))
        .all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| RatePair::new(r.date, &r.currency))
            .collect())
    }

    async fn replace_rates(
        &self,
        table: &TableRef,
        quotes: &[RateQuote],
    ) -> Result<u64, WarehouseError> {
        let backend = DbBackend::Postgres;
        let txn = self.db.begin().await?;

        lock_table(&txn, table).await?;
        txn.execute(backend.build(&create_rate_table(table))).await?;
        txn.execute(raw(format!("DELETE FROM {}", table.qualified())))
            .await?;

        let mut written = 0u64;
        for chunk in quotes.chunks(INSERT_CHUNK_SIZE) {
            let mut insert = Query::insert();
            insert.into_table(sql_table(table)).columns([
                Alias::new("date"),
                Alias::new("base_currency"),
                Alias::new("target_currency"),
                Alias::new("rate"),
            ]);

            for quote in chunk {
                insert
                    .values([
                        quote.date.into(),
                        quote.base_currency.clone().into(),
                        quote.target_currency.clone().into(),
                        quote.rate.into(),
                    ])
                    .map_err(|e| DbErr::Custom(e.to_string()))?;
            }

            written += txn.execute(backend.build(&insert)).await?.rows_affected();
        }

        txn.commit().await?;

        Ok(written)
    }

    async fn rebuild_enriched(&self, plan: &RebuildPlan) -> Result<u64, WarehouseError> {
        let txn = self.db.begin().await?;

        lock_table(&txn, &plan.destination).await?;

        let carried: Vec<String> = priced_columns(&txn, &plan.source)
            .await?
            .into_iter()
            .filter(|c| c != &plan.derived_column)
            .collect();

        if table_columns(&txn, &plan.rates).await?.is_empty() {
            return Err(WarehouseError::TableNotFound(plan.rates.to_string()));
        }

        let staging = staging_table(&plan.destination)?;
        tracing::debug!("Building {} from {}", staging, plan.source);

        txn.execute(raw(format!(
            "CREATE TABLE {} AS {}",
            staging.qualified(),
            rebuild_select_sql(plan, &carried)
        )))
        .await?;

        txn.execute(raw(format!(
            "DROP TABLE IF EXISTS {}",
            plan.destination.qualified()
        )))
        .await?;

        txn.execute(raw(format!(
            "ALTER TABLE {} RENAME TO {}",
            staging.qualified(),
            quote_ident(plan.destination.name())
        )))
        .await?;

        let rows = CountRow::find_by_statement(raw(format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            plan.destination.qualified()
        )))
        .one(&txn)
        .await?
        .map(|r| r.row_count.max(0) as u64)
        .unwrap_or(0);

        // Nothing is visible to readers before this point
        txn.commit().await?;

        Ok(rows)
    }
}
