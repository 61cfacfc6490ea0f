/*!
Tests for error handling and error types.
*/

#[cfg(test)]
mod tests {
    use crate::error::KeepError;
    use std::io;

    #[test]
    fn test_keep_error_display() {
        let error = KeepError::protocol("Database plugin must include a request action");
        assert_eq!(
            error.to_string(),
            "Protocol error: Database plugin must include a request action"
        );

        let error = KeepError::write("backend is read-only");
        assert_eq!(error.to_string(), "Write error: backend is read-only");

        let error = KeepError::not_found("queries", "q1");
        assert_eq!(error.to_string(), "Key not found: queries[q1]");
    }

    #[test]
    fn test_keep_error_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let keep_error = KeepError::from(io_error);

        match keep_error {
            KeepError::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_json_error_becomes_format_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{\"a\":").unwrap_err();
        let message = json_error.to_string();
        let keep_error = KeepError::from(json_error);

        match keep_error {
            KeepError::Format(msg) => assert_eq!(msg, message),
            _ => panic!("Expected Format error variant"),
        }
    }

    #[test]
    fn test_is_not_found() {
        assert!(KeepError::not_found("events", "k").is_not_found());
        assert!(!KeepError::write("nope").is_not_found());
        assert!(!KeepError::unavailable("closed").is_not_found());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KeepError>();
        assert_sync::<KeepError>();
    }

    #[test]
    fn test_error_result_type() {
        fn returns_error() -> crate::Result<()> {
            Err(KeepError::validation("test error"))
        }

        let result = returns_error();
        assert!(matches!(result, Err(KeepError::Validation(_))));
    }
}
