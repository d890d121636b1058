use chrono::{DateTime, Utc};
use common::job::bound_error_msg;
use common::retry::RetryHistory;
use common::{JobMessage, JobStatus, JobTopic};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};

use crate::entity::{dead_letter_job, worker_job};

/// Columns written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ..Self::default()
        }
    }

    pub fn finished(at: DateTime<Utc>) -> Self {
        Self {
            completed_at: Some(at),
            ..Self::default()
        }
    }

    pub fn failed(at: DateTime<Utc>, code: &str, msg: &str) -> Self {
        Self {
            error_code: Some(code.to_string()),
            error_msg: Some(bound_error_msg(msg)),
            completed_at: Some(at),
            ..Self::default()
        }
    }
}

/// Result of attempting to resolve a dead-letter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveResult {
    Resolved,
    NotFound,
    AlreadyResolved,
}

/// Queries over `worker_job` and `dead_letter_job`.
pub struct JobService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> JobService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn insert_queued(&self, message: &JobMessage) -> Result<worker_job::Model, DbErr> {
        worker_job::ActiveModel {
            uid: Set(message.job_uid.clone()),
            topic: Set(message.topic.to_string()),
            command: Set(message.command.clone()),
            image_uid: Set(message.image_uid.clone()),
            status: Set(JobStatus::Queued),
            attempts: Set(0),
            enqueued_at: Set(message.enqueued_at),
            started_at: Set(None),
            completed_at: Set(None),
            error_code: Set(None),
            error_msg: Set(None),
            payload: Set(message.payload.clone()),
        }
        .insert(self.conn)
        .await
    }

    pub async fn find(&self, uid: &str) -> Result<Option<worker_job::Model>, DbErr> {
        worker_job::Entity::find_by_id(uid.to_string())
            .one(self.conn)
            .await
    }

    /// Move a job to `next` if its current status allows it.
    ///
    /// The check and the write are one conditional `UPDATE`, so two racing
    /// transitions cannot both win. Returns whether the row changed.
    pub async fn transition(
        &self,
        uid: &str,
        next: JobStatus,
        update: StatusUpdate,
    ) -> Result<bool, DbErr> {
        let allowed: Vec<JobStatus> = JobStatus::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect();
        if allowed.is_empty() {
            return Ok(false);
        }

        let mut query = worker_job::Entity::update_many()
            .col_expr(worker_job::Column::Status, Expr::value(next))
            .filter(worker_job::Column::Uid.eq(uid))
            .filter(worker_job::Column::Status.is_in(allowed));

        if let Some(at) = update.started_at {
            query = query
                .col_expr(worker_job::Column::StartedAt, Expr::value(Some(at)))
                .col_expr(worker_job::Column::Attempts, Expr::value(1));
        }
        if let Some(at) = update.completed_at {
            query = query.col_expr(worker_job::Column::CompletedAt, Expr::value(Some(at)));
        }
        if let Some(code) = update.error_code {
            query = query.col_expr(worker_job::Column::ErrorCode, Expr::value(Some(code)));
        }
        if let Some(msg) = update.error_msg {
            query = query.col_expr(worker_job::Column::ErrorMsg, Expr::value(Some(msg)));
        }

        Ok(query.exec(self.conn).await?.rows_affected > 0)
    }

    /// Note a failed attempt on a running job.
    pub async fn record_attempt(&self, uid: &str, attempt: u32, error: &str) -> Result<(), DbErr> {
        worker_job::Entity::update_many()
            .col_expr(worker_job::Column::Attempts, Expr::value(attempt as i32 + 1))
            .col_expr(
                worker_job::Column::ErrorMsg,
                Expr::value(Some(bound_error_msg(error))),
            )
            .filter(worker_job::Column::Uid.eq(uid))
            .filter(worker_job::Column::Status.eq(JobStatus::Running))
            .exec(self.conn)
            .await?;
        Ok(())
    }

    pub async fn list(
        &self,
        topic: Option<JobTopic>,
        status: Option<JobStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<worker_job::Model>, u64), DbErr> {
        let mut query = worker_job::Entity::find();
        if let Some(topic) = topic {
            query = query.filter(worker_job::Column::Topic.eq(topic.as_str()));
        }
        if let Some(status) = status {
            query = query.filter(worker_job::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(worker_job::Column::EnqueuedAt)
            .paginate(self.conn, per_page);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((rows, total))
    }

    pub async fn with_status(&self, status: JobStatus) -> Result<Vec<worker_job::Model>, DbErr> {
        worker_job::Entity::find()
            .filter(worker_job::Column::Status.eq(status))
            .order_by_asc(worker_job::Column::EnqueuedAt)
            .all(self.conn)
            .await
    }

    /// Persist a job that failed for good. A second entry for the same job
    /// (e.g. a redelivery that failed again) replaces nothing and is ignored.
    pub async fn dead_letter(
        &self,
        message: &JobMessage,
        error_code: &str,
        error_message: &str,
        history: &RetryHistory,
    ) -> Result<(), DbErr> {
        let exists = dead_letter_job::Entity::find()
            .filter(dead_letter_job::Column::JobUid.eq(&message.job_uid))
            .one(self.conn)
            .await?
            .is_some();
        if exists {
            return Ok(());
        }

        let now = Utc::now();
        dead_letter_job::ActiveModel {
            job_uid: Set(message.job_uid.clone()),
            topic: Set(message.topic.to_string()),
            image_uid: Set(message.image_uid.clone()),
            payload: Set(message.payload.clone()),
            error_message: Set(bound_error_msg(error_message)),
            error_code: Set(error_code.to_string()),
            retry_count: Set(history.len() as i32),
            retry_history: Set(serde_json::to_value(history).unwrap_or_default()),
            first_failed_at: Set(history.first_failed_at().unwrap_or(now)),
            created_at: Set(now),
            resolved: Set(false),
            resolved_at: Set(None),
            resolved_by: Set(None),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;
        Ok(())
    }

    pub async fn list_dead_letters(
        &self,
        resolved: Option<bool>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<dead_letter_job::Model>, u64), DbErr> {
        let mut query = dead_letter_job::Entity::find();
        if let Some(resolved) = resolved {
            query = query.filter(dead_letter_job::Column::Resolved.eq(resolved));
        }
        let paginator = query
            .order_by_desc(dead_letter_job::Column::CreatedAt)
            .paginate(self.conn, per_page);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((rows, total))
    }

    pub async fn get_dead_letter(&self, id: i32) -> Result<Option<dead_letter_job::Model>, DbErr> {
        dead_letter_job::Entity::find_by_id(id).one(self.conn).await
    }

    pub async fn resolve_dead_letter(&self, id: i32, by: &str) -> Result<ResolveResult, DbErr> {
        let result = dead_letter_job::Entity::update_many()
            .col_expr(dead_letter_job::Column::Resolved, Expr::value(true))
            .col_expr(dead_letter_job::Column::ResolvedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                dead_letter_job::Column::ResolvedBy,
                Expr::value(Some(by.to_string())),
            )
            .filter(dead_letter_job::Column::Id.eq(id))
            .filter(dead_letter_job::Column::Resolved.eq(false))
            .exec(self.conn)
            .await?;

        if result.rows_affected > 0 {
            return Ok(ResolveResult::Resolved);
        }
        Ok(match self.get_dead_letter(id).await? {
            Some(_) => ResolveResult::AlreadyResolved,
            None => ResolveResult::NotFound,
        })
    }
}
