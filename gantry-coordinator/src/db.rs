use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create executions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id UUID PRIMARY KEY,
            status VARCHAR(50) NOT NULL,
            requested_agents INTEGER NOT NULL,
            failure_reason TEXT,
            requested_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create agents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id VARCHAR(255) PRIMARY KEY,
            container_name VARCHAR(255) NOT NULL,
            version VARCHAR(100),
            execution_id UUID NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
            registered_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create agent status log; the BIGSERIAL id doubles as the append-order
    // sequence, reported_sequence is the agent-side heartbeat counter
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_status (
            id BIGSERIAL PRIMARY KEY,
            agent_id VARCHAR(255) NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            state VARCHAR(50) NOT NULL,
            reported_sequence BIGINT,
            recorded_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create test batches table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS test_batches (
            id UUID PRIMARY KEY,
            execution_id UUID NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            tests JSONB NOT NULL,
            assigned_to VARCHAR(255),
            completed BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create test results table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS test_results (
            execution_id UUID NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
            test_id UUID NOT NULL,
            agent_id VARCHAR(255),
            verdict VARCHAR(50) NOT NULL,
            detail TEXT,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (execution_id, test_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create tool logs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tool_logs (
            id BIGSERIAL PRIMARY KEY,
            agent_id VARCHAR(255) NOT NULL,
            execution_id UUID NOT NULL,
            content TEXT NOT NULL,
            uploaded_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_execution ON agents(execution_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_agent_status_agent ON agent_status(agent_id, id DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_test_batches_claim \
         ON test_batches(execution_id, position) WHERE assigned_to IS NULL AND NOT completed",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_test_batches_assigned ON test_batches(assigned_to)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_test_results_verdict ON test_results(execution_id, verdict)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
