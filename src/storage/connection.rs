use crate::storage::entity::{area, venue};
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Schema,
    Statement,
};
use std::time::Duration;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_areas_parent ON areas(parent_id);",
    "CREATE INDEX IF NOT EXISTS idx_areas_level ON areas(level);",
    "CREATE INDEX IF NOT EXISTS idx_areas_natural_key ON areas(name, level, area_type);",
    "CREATE INDEX IF NOT EXISTS idx_venues_area ON venues(area_id);",
];

// 内存库只有一条连接，回收即丢库；sqlx 默认 10 分钟空闲/30 分钟寿命
const MEMORY_KEEPALIVE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

fn connect_options(db_url: &str) -> ConnectOptions {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    if is_memory_url(db_url) {
        // 每条 :memory: 连接都是独立的数据库
        opt.max_connections(1)
            .min_connections(1)
            .idle_timeout(MEMORY_KEEPALIVE)
            .max_lifetime(MEMORY_KEEPALIVE);
    } else {
        opt.max_connections(10)
            .min_connections(2)
            .idle_timeout(Duration::from_secs(8))
            .max_lifetime(Duration::from_secs(8));
    }
    opt.connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Info);
    opt
}

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(connect_options(db_url)).await?;

    if db.get_database_backend() == DatabaseBackend::Sqlite {
        db.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
        db.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "PRAGMA foreign_keys=ON;".to_string(),
        ))
        .await?;
    }

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    // 先建父表：venues 引用 areas
    let stmt = builder.build(schema.create_table_from_entity(area::Entity).if_not_exists());
    db.execute(stmt).await?;

    let stmt = builder.build(schema.create_table_from_entity(venue::Entity).if_not_exists());
    db.execute(stmt).await?;

    for sql in INDEXES {
        db.execute(Statement::from_string(builder, sql.to_string()))
            .await?;
    }

    info!("Database connection established, area tables initialized.");

    Ok(db)
}

fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}
