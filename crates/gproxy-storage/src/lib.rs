pub mod db;
pub mod entities;
pub mod writer;

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr, Schema};

pub use writer::{flush_batch, run as run_writer, InteractionQueue, InteractionRecord};

use db::connect_shared;

#[derive(Clone)]
pub struct InteractionStorage {
    db: DatabaseConnection,
    queue: Arc<InteractionQueue>,
}

impl InteractionStorage {
    pub async fn connect(dsn: &str) -> Result<Self, DbErr> {
        let db = connect_shared(dsn).await?;
        Ok(Self {
            db,
            queue: Arc::new(InteractionQueue::default()),
        })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn queue(&self) -> Arc<InteractionQueue> {
        self.queue.clone()
    }

    /// Creates the `interactions` table if it doesn't already exist.
    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Interactions)
            .sync(&self.db)
            .await
    }

    /// Enqueues a completed interaction for the background writer. Never
    /// blocks: under sustained overload the oldest queued record is dropped.
    pub fn record(&self, record: InteractionRecord) {
        self.queue.push(record);
    }

    /// Persists whatever is left in the queue immediately, bypassing the
    /// writer's poll loop. Used on graceful shutdown.
    pub async fn drain(&self) {
        let remaining = self.queue.drain_all();
        if !remaining.is_empty() {
            flush_batch(&self.db, remaining).await;
        }
    }
}
