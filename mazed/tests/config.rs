#[cfg(test)]
mod tests {
    use mazed::Error;
    use mazed::config::Config;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").expect("Failed to parse empty configuration");

        assert_eq!(config, Config::default());
        assert_eq!(config.game_port, 4000);
        assert_eq!(config.websocket_port, 1234);
        assert_eq!(config.users_file, PathBuf::from("users"));
        assert_eq!(config.idle_timeout(), Duration::from_millis(500));
        assert_eq!(config.queue_limit, 20);
        assert_eq!(config.result_hook, None);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse(
            r#"
            game_port = 4100
            users_file = "/srv/maze/users"
            result_hook = "/srv/maze/record"

            [logging]
            level = "mazed=debug"
            json = true
            "#,
        )
        .expect("Failed to parse configuration");

        assert_eq!(config.game_port, 4100);
        assert_eq!(config.websocket_port, 1234, "Unset fields keep their default");
        assert_eq!(config.users_file, PathBuf::from("/srv/maze/users"));
        assert_eq!(config.result_hook, Some(PathBuf::from("/srv/maze/record")));
        assert_eq!(config.logging.level, "mazed=debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_documents() {
        for content in [
            "game_port = \"four thousand\"",
            "queue_limit = 0",
            "game_port = 5000\nwebsocket_port = 5000",
        ] {
            assert!(
                matches!(Config::parse(content), Err(Error::Config(_))),
                "{content:?} should be refused"
            );
        }
    }

    #[test]
    fn test_ephemeral_ports_may_match() {
        let config = Config::parse("game_port = 0\nwebsocket_port = 0").expect("Failed to parse configuration");
        assert_eq!(config.game_port, 0);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "idle_timeout_ms = 2000").expect("Failed to write temp file");

        let config = Config::load(Some(file.path())).expect("Failed to load configuration");
        assert_eq!(config.idle_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = Config::load(Some(dir.path().join("absent.toml").as_path()));

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
