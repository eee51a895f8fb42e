//! Append-only daily performance log. Generalizes the teacher's atomic
//! temp-file+rename write pattern (`settings_persistence`) to an append
//! rather than overwrite, since each EOD report and each archived position
//! adds one line rather than replacing the file.

use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub struct PerformanceLog {
    file_path: String,
}

impl PerformanceLog {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// Appends one newline-terminated line, timestamped with `at`.
    pub async fn append(&self, at: DateTime<Utc>, line: &str) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await?;
        let record = format!("{} | {}\n", at.to_rfc3339(), line);
        file.write_all(record.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_writes_one_line_per_call() {
        let path = std::env::temp_dir().join(format!(
            "riskwatch_perf_log_test_{}.log",
            std::process::id()
        ));
        let log = PerformanceLog::new(path.to_string_lossy().to_string());

        log.append(Utc::now(), "EOD: equity=10000.00 (+0.50%)")
            .await
            .unwrap();
        log.append(Utc::now(), "CLOSED AAPL: realized_pnl=120.00")
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
