use sqlx::PgPool;

/// Executes the SQL queries defined next to each Postgres backend.
///
/// Every query is a plain struct with a `kanau::processor::Processor` impl on
/// this type.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
