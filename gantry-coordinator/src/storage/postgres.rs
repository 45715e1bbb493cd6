//! Postgres storage backend
//!
//! sqlx-based implementation of the storage traits. Status-log ordering
//! rides on the BIGSERIAL id of `agent_status`; the sequence guard and the
//! halt latch are enforced inside single INSERT ... WHERE NOT EXISTS
//! statements so concurrent heartbeat handlers cannot interleave around
//! them. Batch claiming uses FOR UPDATE SKIP LOCKED so two agents can never
//! claim the same batch.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use gantry_core::domain::agent::{Agent, AgentState, AgentStatusSample};
use gantry_core::domain::execution::{Execution, ExecutionStatus};
use gantry_core::domain::test::{TestBatch, TestCase};
use gantry_core::dto::result::{TestResultReport, ToolLogUpload};

use super::{AgentStore, BatchStore, ExecutionStore, Result, ResultStore};

/// Postgres implementation of every storage trait
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PostgresStore {
    async fn create(&self, execution: Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (id, status, requested_agents, failure_reason, requested_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.to_string())
        .bind(execution.requested_agents as i32)
        .bind(&execution.failure_reason)
        .bind(execution.requested_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, status, requested_agents, failure_reason, requested_at, completed_at
            FROM executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self) -> Result<Vec<Execution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, status, requested_agents, failure_reason, requested_at, completed_at
            FROM executions
            ORDER BY requested_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn set_running(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = $2
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(ExecutionStatus::Running.to_string())
        .bind(ExecutionStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_complete(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        reason: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, failure_reason = $3, completed_at = $4
            WHERE id = $1 AND status NOT IN ('Finished', 'Error')
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(reason)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AgentStore for PostgresStore {
    async fn register(&self, agents: Vec<Agent>) -> Result<()> {
        for agent in agents {
            sqlx::query(
                r#"
                INSERT INTO agents (id, container_name, version, execution_id, registered_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&agent.id)
            .bind(&agent.container_name)
            .bind(&agent.version)
            .bind(agent.execution_id)
            .bind(agent.registered_at)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn get(&self, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, AgentRow>(
            r#"
            SELECT id, container_name, version, execution_id, registered_at
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_version(&self, agent_id: &str, version: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE agents SET version = $2 WHERE id = $1")
            .bind(agent_id)
            .bind(version)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn current_state(&self, agent_id: &str) -> Result<Option<AgentState>> {
        let state: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT state FROM agent_status
            WHERE agent_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state.map(|(s,)| state_from_str(&s)))
    }

    async fn current_states(&self, execution_id: Uuid) -> Result<Vec<(Agent, Option<AgentState>)>> {
        let rows = sqlx::query_as::<_, AgentStateRow>(
            r#"
            SELECT a.id, a.container_name, a.version, a.execution_id, a.registered_at, s.state
            FROM agents a
            LEFT JOIN LATERAL (
                SELECT state FROM agent_status
                WHERE agent_id = a.id
                ORDER BY id DESC
                LIMIT 1
            ) s ON TRUE
            WHERE a.execution_id = $1
            ORDER BY a.id
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let state = r.state.as_deref().map(state_from_str);
                (r.into(), state)
            })
            .collect())
    }

    async fn append_reported(
        &self,
        agent_id: &str,
        state: AgentState,
        reported_sequence: u64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO agent_status (agent_id, state, reported_sequence, recorded_at)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM agent_status
                WHERE agent_id = $1
                  AND (COALESCE(reported_sequence, 0) >= $3
                       OR state IN ('Crashed', 'Terminated'))
            )
            "#,
        )
        .bind(agent_id)
        .bind(state.to_string())
        .bind(reported_sequence as i64)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_forced(&self, agent_id: &str, state: AgentState) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO agent_status (agent_id, state, recorded_at)
            SELECT $1, $2, $3
            WHERE NOT EXISTS (
                SELECT 1 FROM agent_status
                WHERE agent_id = $1 AND state IN ('Crashed', 'Terminated')
            )
            "#,
        )
        .bind(agent_id)
        .bind(state.to_string())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn history(&self, agent_id: &str) -> Result<Vec<AgentStatusSample>> {
        let rows = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT id, agent_id, state, recorded_at
            FROM agent_status
            WHERE agent_id = $1
            ORDER BY id
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

#[async_trait]
impl BatchStore for PostgresStore {
    async fn enqueue(&self, batches: Vec<TestBatch>) -> Result<()> {
        for (position, batch) in batches.into_iter().enumerate() {
            let tests = serde_json::to_value(&batch.tests)
                .expect("test cases are always JSON-serializable");

            sqlx::query(
                r#"
                INSERT INTO test_batches (id, execution_id, position, tests, assigned_to, completed)
                VALUES ($1, $2, $3, $4, NULL, FALSE)
                "#,
            )
            .bind(batch.id)
            .bind(batch.execution_id)
            .bind(position as i32)
            .bind(tests)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn assigned_to(&self, agent_id: &str) -> Result<Option<TestBatch>> {
        let row = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT id, execution_id, tests
            FROM test_batches
            WHERE assigned_to = $1 AND NOT completed
            ORDER BY position
            LIMIT 1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn claim_next(&self, execution_id: Uuid, agent_id: &str) -> Result<Option<TestBatch>> {
        let row = sqlx::query_as::<_, BatchRow>(
            r#"
            UPDATE test_batches SET assigned_to = $2
            WHERE id = (
                SELECT id FROM test_batches
                WHERE execution_id = $1 AND assigned_to IS NULL AND NOT completed
                ORDER BY position
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, execution_id, tests
            "#,
        )
        .bind(execution_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn complete_assigned(&self, agent_id: &str) -> Result<Option<TestBatch>> {
        let row = sqlx::query_as::<_, BatchRow>(
            r#"
            UPDATE test_batches SET completed = TRUE
            WHERE id = (
                SELECT id FROM test_batches
                WHERE assigned_to = $1 AND NOT completed
                ORDER BY position
                LIMIT 1
                FOR UPDATE
            )
            RETURNING id, execution_id, tests
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn remaining(&self, execution_id: Uuid) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM test_batches WHERE execution_id = $1 AND NOT completed",
        )
        .bind(execution_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }
}

#[async_trait]
impl ResultStore for PostgresStore {
    async fn init_pending(&self, execution_id: Uuid, tests: &[TestCase]) -> Result<()> {
        for test in tests {
            sqlx::query(
                r#"
                INSERT INTO test_results (execution_id, test_id, agent_id, verdict, detail, updated_at)
                VALUES ($1, $2, NULL, 'Pending', NULL, $3)
                ON CONFLICT (execution_id, test_id) DO NOTHING
                "#,
            )
            .bind(execution_id)
            .bind(test.id)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn record(&self, report: &TestResultReport) -> Result<()> {
        for outcome in &report.outcomes {
            let verdict = if outcome.passed { "Passed" } else { "Failed" };

            sqlx::query(
                r#"
                INSERT INTO test_results (execution_id, test_id, agent_id, verdict, detail, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (execution_id, test_id) DO UPDATE SET
                    agent_id = EXCLUDED.agent_id,
                    verdict = EXCLUDED.verdict,
                    detail = EXCLUDED.detail,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(report.execution_id)
            .bind(outcome.test_id)
            .bind(&report.agent_id)
            .bind(verdict)
            .bind(&outcome.detail)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn results_saved(&self, execution_id: Uuid, batch: &TestBatch) -> Result<bool> {
        let test_ids: Vec<Uuid> = batch.tests.iter().map(|t| t.id).collect();

        let (saved,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM test_results
            WHERE execution_id = $1 AND test_id = ANY($2) AND verdict != 'Pending'
            "#,
        )
        .bind(execution_id)
        .bind(&test_ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(saved as usize == test_ids.len())
    }

    async fn mark_failed(
        &self,
        execution_id: Uuid,
        test_ids: &[Uuid],
        detail: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE test_results
            SET verdict = 'Failed', detail = $3, updated_at = $4
            WHERE execution_id = $1 AND test_id = ANY($2)
            "#,
        )
        .bind(execution_id)
        .bind(test_ids)
        .bind(detail)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_pending_failed(&self, execution_id: Uuid, detail: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE test_results
            SET verdict = 'Failed', detail = $2, updated_at = $3
            WHERE execution_id = $1 AND verdict = 'Pending'
            "#,
        )
        .bind(execution_id)
        .bind(detail)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_pending(&self, execution_id: Uuid) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM test_results WHERE execution_id = $1 AND verdict = 'Pending'",
        )
        .bind(execution_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn append_log(&self, upload: &ToolLogUpload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tool_logs (agent_id, execution_id, content, uploaded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&upload.agent_id)
        .bind(upload.execution_id)
        .bind(&upload.content)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    status: String,
    requested_agents: i32,
    failure_reason: Option<String>,
    requested_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ExecutionRow> for Execution {
    fn from(row: ExecutionRow) -> Self {
        let status = match row.status.as_str() {
            "Pending" => ExecutionStatus::Pending,
            "Running" => ExecutionStatus::Running,
            "Finished" => ExecutionStatus::Finished,
            _ => ExecutionStatus::Error,
        };

        Execution {
            id: row.id,
            status,
            requested_agents: row.requested_agents as u32,
            failure_reason: row.failure_reason,
            requested_at: row.requested_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    container_name: String,
    version: Option<String>,
    execution_id: Uuid,
    registered_at: chrono::DateTime<chrono::Utc>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: row.id,
            container_name: row.container_name,
            version: row.version,
            execution_id: row.execution_id,
            registered_at: row.registered_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AgentStateRow {
    id: String,
    container_name: String,
    version: Option<String>,
    execution_id: Uuid,
    registered_at: chrono::DateTime<chrono::Utc>,
    state: Option<String>,
}

impl From<AgentStateRow> for Agent {
    fn from(row: AgentStateRow) -> Self {
        Agent {
            id: row.id,
            container_name: row.container_name,
            version: row.version,
            execution_id: row.execution_id,
            registered_at: row.registered_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    id: i64,
    agent_id: String,
    state: String,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

impl From<StatusRow> for AgentStatusSample {
    fn from(row: StatusRow) -> Self {
        AgentStatusSample {
            agent_id: row.agent_id,
            state: state_from_str(&row.state),
            sequence: row.id as u64,
            recorded_at: row.recorded_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    execution_id: Uuid,
    tests: serde_json::Value,
}

impl From<BatchRow> for TestBatch {
    fn from(row: BatchRow) -> Self {
        let tests: Vec<TestCase> = serde_json::from_value(row.tests).unwrap_or_default();
        TestBatch {
            id: row.id,
            execution_id: row.execution_id,
            tests,
        }
    }
}

fn state_from_str(s: &str) -> AgentState {
    match s {
        "Starting" => AgentState::Starting,
        "Idle" => AgentState::Idle,
        "Busy" => AgentState::Busy,
        "Finished" => AgentState::Finished,
        "Terminated" => AgentState::Terminated,
        "BackendFailure" => AgentState::BackendFailure,
        "BackendUnreachable" => AgentState::BackendUnreachable,
        "CliFailed" => AgentState::CliFailed,
        // Unknown states are treated as crashed; they cannot drive protocol
        // decisions anyway
        _ => AgentState::Crashed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            AgentState::Starting,
            AgentState::Idle,
            AgentState::Busy,
            AgentState::Finished,
            AgentState::Crashed,
            AgentState::Terminated,
            AgentState::BackendFailure,
            AgentState::BackendUnreachable,
            AgentState::CliFailed,
        ] {
            assert_eq!(state_from_str(&state.to_string()), state);
        }
    }

    #[test]
    fn test_unknown_state_maps_to_crashed() {
        assert_eq!(state_from_str("Rebooting"), AgentState::Crashed);
    }
}
