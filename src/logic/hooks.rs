use crate::model::Id;

/// Callback fired after every successful mutating operation. Embedding
/// applications hang audit logging and cache invalidation off this seam.
#[async_trait::async_trait]
pub trait WriteHook: Send + Sync {
    async fn after_write(&self, operation: &str, definition_id: &Id, instance_id: Option<&Id>);
}

pub struct NoopHook;

#[async_trait::async_trait]
impl WriteHook for NoopHook {
    async fn after_write(&self, _: &str, _: &Id, _: Option<&Id>) {}
}

pub static NOOP_HOOK: NoopHook = NoopHook;

/// Logs each successful write at info level
pub struct LoggingHook;

#[async_trait::async_trait]
impl WriteHook for LoggingHook {
    async fn after_write(&self, operation: &str, definition_id: &Id, instance_id: Option<&Id>) {
        match instance_id {
            Some(instance_id) => {
                log::info!("{} type={} instance={}", operation, definition_id, instance_id)
            }
            None => log::info!("{} type={}", operation, definition_id),
        }
    }
}
