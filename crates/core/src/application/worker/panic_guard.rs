// Panic isolation for worker safety (ADR-002)
use std::any::Any;
use std::future::Future;

/// Run a future in its own task so a panic cannot unwind into the caller.
///
/// Returns the panic message if the task panicked.
pub async fn run_guarded<F>(future: F) -> Result<F::Output, String>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(output) => Ok(output),
        Err(join_err) if join_err.is_panic() => Err(panic_message(join_err.into_panic())),
        Err(join_err) => Err(format!("task cancelled: {}", join_err)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_output_through() {
        assert_eq!(run_guarded(async { 42 }).await, Ok(42));
    }

    #[tokio::test]
    async fn test_panic_is_caught_with_message() {
        let result = run_guarded(async {
            panic!("boom");
        })
        .await;
        assert_eq!(result, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let code = 7;
        let result: Result<(), String> = run_guarded(async move {
            panic!("failed with {}", code);
        })
        .await;
        assert_eq!(result, Err("failed with 7".to_string()));
    }
}
