use crate::error::{Result, SyncError};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const COMMITTER_NAME: &str = "pagesync";
pub const COMMITTER_EMAIL: &str = "pagesync@localhost";

#[derive(Debug)]
pub struct GitOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// A git work tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    deadline: Duration,
}

impl GitRepo {
    pub fn new(root: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            root: root.into(),
            deadline,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_repo(&self) -> bool {
        self.root.join(".git").is_dir()
    }

    /// `git init` plus the fixed committer identity. Safe to call repeatedly.
    pub fn init(&self) -> Result<()> {
        if !self.is_repo() {
            self.checked("init", &["init", "--quiet"])?;
        }
        self.checked("config", &["config", "user.name", COMMITTER_NAME])?;
        self.checked("config", &["config", "user.email", COMMITTER_EMAIL])?;
        self.checked("config", &["config", "commit.gpgsign", "false"])?;
        Ok(())
    }

    pub fn add(&self, file: &str) -> Result<()> {
        self.checked("add", &["add", "--", file]).map(|_| ())
    }

    pub fn rm(&self, file: &str) -> Result<()> {
        self.checked("rm", &["rm", "--quiet", "--cached", "--ignore-unmatch", "--", file])
            .map(|_| ())
    }

    /// True when the index holds changes for `file` relative to HEAD.
    ///
    /// Uses the exit status of `git diff --cached --quiet`, which is stable
    /// across locales and versions. On an unborn branch everything staged counts.
    pub fn has_staged_changes(&self, file: &str) -> Result<bool> {
        if !self.has_head()? {
            let out = self.checked("ls-files", &["ls-files", "--cached", "--", file])?;
            return Ok(!out.stdout.trim().is_empty());
        }

        let out = self.run(&["diff", "--cached", "--quiet", "--", file])?;
        match out.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(self.failure("diff --cached", &out)),
        }
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        let name = format!("user.name={}", COMMITTER_NAME);
        let email = format!("user.email={}", COMMITTER_EMAIL);
        self.checked(
            "commit",
            &["-c", &name, "-c", &email, "commit", "--quiet", "--no-verify", "-m", message],
        )
        .map(|_| ())
    }

    pub fn commit_count(&self) -> Result<usize> {
        if !self.has_head()? {
            return Ok(0);
        }
        let out = self.checked("rev-list", &["rev-list", "--count", "HEAD"])?;
        out.stdout.trim().parse().map_err(|_| SyncError::Git {
            op: "rev-list".to_string(),
            repo: self.root.clone(),
            message: format!("unexpected output: {}", out.stdout.trim()),
        })
    }

    fn has_head(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(out.success())
    }

    fn checked(&self, op: &str, args: &[&str]) -> Result<GitOutput> {
        let out = self.run(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(self.failure(op, &out))
        }
    }

    fn failure(&self, op: &str, out: &GitOutput) -> SyncError {
        SyncError::Git {
            op: op.to_string(),
            repo: self.root.clone(),
            message: format!("{} ({})", out.stderr.trim(), out.status),
        }
    }

    /// Run git in the repository with a deadline.
    pub fn run(&self, args: &[&str]) -> Result<GitOutput> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.root).args(args);
        run_with_deadline(cmd, self.deadline).map_err(|e| SyncError::Git {
            op: args.first().copied().unwrap_or("").to_string(),
            repo: self.root.clone(),
            message: e.to_string(),
        })
    }
}

/// Spawn `cmd` with captured output and wait at most `deadline` for it.
///
/// A child that outlives the deadline is killed.
pub fn run_with_deadline(mut cmd: Command, deadline: Duration) -> std::io::Result<GitOutput> {
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let started = Instant::now();

    // Drain both pipes while waiting so a large output cannot stall the child.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out after {:?}", deadline),
            ));
        }
        std::thread::sleep(Duration::from_millis(5));
    };

    let stdout = collect(stdout)?;
    let stderr = collect(stderr)?;

    Ok(GitOutput {
        status,
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<std::io::Result<String>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            pipe.read_to_string(&mut buf)?;
            Ok(buf)
        })
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<String>>>) -> std::io::Result<String> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "pipe reader panicked"))?,
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::new(temp.path(), Duration::from_secs(30));

        repo.init().unwrap();
        repo.init().unwrap();

        assert!(repo.is_repo());
        assert_eq!(repo.commit_count().unwrap(), 0);
    }

    #[test]
    fn test_staged_change_detection() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::new(temp.path(), Duration::from_secs(30));
        repo.init().unwrap();

        std::fs::write(temp.path().join("1.txt"), "one").unwrap();
        repo.add("1.txt").unwrap();
        assert!(repo.has_staged_changes("1.txt").unwrap());
        repo.commit("first").unwrap();

        // Same content again: nothing staged
        std::fs::write(temp.path().join("1.txt"), "one").unwrap();
        repo.add("1.txt").unwrap();
        assert!(!repo.has_staged_changes("1.txt").unwrap());

        std::fs::write(temp.path().join("1.txt"), "two").unwrap();
        repo.add("1.txt").unwrap();
        assert!(repo.has_staged_changes("1.txt").unwrap());
    }

    #[test]
    fn test_failed_command_reports_op() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::new(temp.path(), Duration::from_secs(30));
        repo.init().unwrap();

        let err = repo.commit("nothing here").unwrap_err();
        match err {
            SyncError::Git { op, .. } => assert_eq!(op, "commit"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
