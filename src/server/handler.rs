/// Computes the response value for a request value.
///
/// Implemented for any `Fn(i64) -> i64`, so a closure works as a handler:
///
/// ```
/// use broker_rpc::Handler;
///
/// let negate = |value: i64| -value;
/// assert_eq!(negate.handle(7), -7);
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, value: i64) -> i64;
}

impl<F> Handler for F
where
    F: Fn(i64) -> i64 + Send + Sync + 'static,
{
    fn handle(&self, value: i64) -> i64 {
        self(value)
    }
}

/// The reference service: returns twice the input.
///
/// Saturates at `i64::MIN`/`i64::MAX` instead of overflowing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Doubler;

impl Handler for Doubler {
    fn handle(&self, value: i64) -> i64 {
        value.saturating_mul(2)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_doubler() {
        // ---
        assert_eq!(Doubler.handle(21), 42);
        assert_eq!(Doubler.handle(0), 0);
        assert_eq!(Doubler.handle(-5), -10);
    }

    #[test]
    fn test_doubler_saturates() {
        // ---
        assert_eq!(Doubler.handle(i64::MAX), i64::MAX);
        assert_eq!(Doubler.handle(i64::MIN), i64::MIN);
        assert_eq!(Doubler.handle(i64::MAX / 2 + 1), i64::MAX);
    }

    #[test]
    fn test_closure_is_a_handler() {
        // ---
        let offset = 100;
        let handler: Box<dyn Handler> = Box::new(move |value: i64| value + offset);
        assert_eq!(handler.handle(1), 101);
    }
}
