#[cfg(test)]
mod tests {
    use mazed::ipc::Directory;
    use mazed::reactor::{Reactor, reap_children};
    use mazed::users::{LOGIN_MAX, UserDirectory, parse_logins};
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn directory(path: &Path, content: &str) -> UserDirectory {
        fs::write(path, content).expect("Failed to write users file");

        let mut users = UserDirectory::new(path, "/bin/true", Vec::new());
        users.reload().expect("Failed to load users");
        users
    }

    #[test]
    fn test_parse_logins() {
        let long = "x".repeat(LOGIN_MAX + 5);
        let content = format!("alice\r\n\nbob\n{long}\n\r\ncarol");

        assert_eq!(
            parse_logins(content.as_bytes()),
            vec![
                "alice".to_string(),
                "bob".to_string(),
                "x".repeat(LOGIN_MAX),
                "carol".to_string()
            ]
        );
        assert!(parse_logins(b"").is_empty());
    }

    #[test]
    fn test_reload() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("users");
        let mut users = directory(&path, "alice\nbob\nalice\n");

        assert_eq!(users.len(), 2, "Duplicates count once");
        assert!(users.user_exists("alice"));
        assert!(!users.user_exists("carol"));

        fs::write(&path, "carol\n").expect("Failed to write users file");
        users.reload().expect("Failed to reload users");

        assert_eq!(users.len(), 1);
        assert!(!users.user_exists("alice"));
        assert!(users.user_exists("carol"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut users = UserDirectory::new(dir.path().join("absent"), "/bin/true", Vec::new());

        assert!(users.reload().is_err());
        assert!(users.is_empty());
    }

    #[test]
    fn test_worker_lifecycle() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("users");
        let mut users = directory(&path, "alice\n");
        let mut reactor = Reactor::new().expect("Failed to create reactor");

        assert!(users.worker_pipe(&mut reactor, "bob").is_none(), "Unknown users get no worker");

        let pipe = users
            .worker_pipe(&mut reactor, "alice")
            .expect("Failed to start worker");
        assert!(users.has_worker("alice"));

        let again = users
            .worker_pipe(&mut reactor, "alice")
            .expect("Worker should still be known");
        assert_eq!(pipe.fd(), again.fd(), "A running worker is reused");

        // A removed user keeps its worker until it exits.
        fs::write(&path, "").expect("Failed to write users file");
        users.reload().expect("Failed to reload users");
        assert!(!users.user_exists("alice"));

        fs::write(&path, "alice\n").expect("Failed to write users file");
        users.reload().expect("Failed to reload users");
        assert!(users.has_worker("alice"), "A returning user gets its worker back");

        let start = Instant::now();
        let mut exited = Vec::new();
        while exited.is_empty() && start.elapsed() < Duration::from_secs(5) {
            reactor.turn(Some(Duration::from_millis(10))).expect("Failed to run reactor turn");
            exited = reap_children();
        }
        let child = exited.first().expect("The worker should have exited");

        users.end_process(&mut reactor, child.pid);
        assert!(!users.has_worker("alice"));
        assert!(pipe.is_dead(), "The control pipe is closed with the worker");
    }
}
