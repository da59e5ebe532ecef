//! SQLite 数据库工具：统一创建连接池并执行 sqlx 迁移
//!
//! 约定：本 crate 根目录下存在 `migrations/` 目录，存放所有迁移 SQL 文件。
//! 通过 `sqlx::migrate!()` 自动管理 schema 升级。

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

/// 创建 SQLite 连接池并执行所有未执行的迁移
pub async fn create_sqlite_pool_with_migration(
    db_url: &str,
    max_connections: u32,
) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .context(format!("连接SQLite数据库失败: {}", db_url))?;

    sqlx::migrate!().run(&pool).await.context("执行数据库迁移失败")?;
    info!("[DB] 数据库已就绪: {}", db_url);

    Ok(pool)
}

/// 创建内存数据库（测试与演示用）
///
/// 内存库随连接存在，因此只保留一个连接并禁止空闲回收。
pub async fn create_memory_pool() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("创建内存数据库失败")?;

    sqlx::migrate!().run(&pool).await.context("执行数据库迁移失败")?;
    Ok(pool)
}
