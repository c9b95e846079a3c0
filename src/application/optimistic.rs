use crate::infrastructure::error::EngineError;
use std::future::Future;
use std::sync::Mutex;

/// Optimistic mutation over an in-memory collection: the new value is
/// visible immediately, the backend confirms afterward, and a rejection
/// restores the captured original exactly.
///
/// The replacement only happens when a tracked field actually differs, so
/// a no-op toggle does not churn the collection. Items are matched by the
/// `key_of` identifier; concurrent calls for different items never touch
/// each other's state.
pub async fn apply_with_rollback<T, K, F, Fut>(
    items: &Mutex<Vec<T>>,
    updated: T,
    key_of: K,
    mutation: F,
) -> Result<(), EngineError>
where
    T: Clone + PartialEq,
    K: Fn(&T) -> &str,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), EngineError>>,
{
    let key = key_of(&updated).to_string();
    let captured = {
        let mut items = items
            .lock()
            .map_err(|error| EngineError::Internal(format!("collection lock poisoned: {error}")))?;
        match items.iter().position(|item| key_of(item) == key) {
            Some(position) if items[position] != updated => {
                Some(std::mem::replace(&mut items[position], updated))
            }
            _ => None,
        }
    };

    match mutation().await {
        Ok(()) => Ok(()),
        Err(error) => {
            if let Some(original) = captured {
                let mut items = items.lock().map_err(|error| {
                    EngineError::Internal(format!("collection lock poisoned: {error}"))
                })?;
                if let Some(position) = items.iter().position(|item| key_of(item) == key) {
                    items[position] = original;
                }
            }
            Err(error)
        }
    }
}
