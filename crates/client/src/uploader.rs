//! Upload job orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use splitup_protocol::wire::{read_message, write_message};
use splitup_protocol::{
    Command, END_REPLY_TIMEOUT, EndReply, PlanReply, READ_TIMEOUT, WRITE_TIMEOUT, reply,
};
use splitup_transfer::{Progress, ProgressMeter, SplitPlan, UploadFailure, validate_file_name};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::ClientError;
use crate::connect::open_session;
use crate::policy::{ConnectPolicy, RoundPolicy};
use crate::segment::upload_segment;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub server_addr: String,
    pub user: String,
    pub secret: String,
    pub connect: ConnectPolicy,
    pub rounds: RoundPolicy,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Deadline for the `end` reply, which includes server-side assembly.
    pub end_timeout: Duration,
    /// How long a segment task waits for the server to close after sending.
    pub close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8888".into(),
            user: "client".into(),
            secret: "12345".into(),
            connect: ConnectPolicy::default(),
            rounds: RoundPolicy::default(),
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            end_timeout: END_REPLY_TIMEOUT,
            close_timeout: Duration::from_secs(30),
        }
    }
}

/// Summary of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub uid: String,
    pub total_size: u64,
    pub segment_size: u64,
    /// Rounds it took, starting at 1.
    pub rounds: u32,
}

/// A failed upload: the progress code that was reported, and why.
#[derive(Debug, thiserror::Error)]
#[error("upload failed ({}): {source}", .failure.code())]
pub struct UploadError {
    pub failure: UploadFailure,
    #[source]
    pub source: ClientError,
}

fn fail(failure: UploadFailure) -> impl FnOnce(ClientError) -> UploadError {
    move |source| UploadError { failure, source }
}

/// Control connection of a job together with the plan it negotiated.
struct Control {
    stream: TcpStream,
    plan: PlanReply,
}

/// Runs upload jobs against one server.
#[derive(Clone)]
pub struct Uploader {
    config: Arc<ClientConfig>,
}

impl Uploader {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Uploads `path`, reporting progress on `progress`.
    ///
    /// Exactly one terminal value is sent: `Percent(100)` once the server
    /// confirmed assembly, or `Failed(_)` with the reason.
    pub async fn upload(
        &self,
        path: &Path,
        progress: mpsc::Sender<Progress>,
    ) -> Result<UploadReport, UploadError> {
        let outcome = self.run_job(path, &progress).await;
        let terminal = match &outcome {
            Ok(report) => {
                info!(uid = %report.uid, rounds = report.rounds, "upload complete");
                Progress::Percent(100)
            }
            Err(e) => {
                warn!(path = %path.display(), "{e}");
                Progress::Failed(e.failure)
            }
        };
        let _ = progress.send(terminal).await;
        outcome
    }

    async fn run_job(
        &self,
        path: &Path,
        progress: &mpsc::Sender<Progress>,
    ) -> Result<UploadReport, UploadError> {
        let (file_name, total_size) = inspect_file(path)
            .await
            .map_err(fail(UploadFailure::FileInfo))?;

        let stream = open_session(&self.config).await.map_err(|e| match e {
            ClientError::AuthRejected => fail(UploadFailure::Auth)(e),
            other => fail(UploadFailure::Connection)(other),
        })?;
        let control = self
            .request_plan(stream, &file_name, total_size)
            .await
            .map_err(fail(UploadFailure::Split))?;

        let plan = SplitPlan::new(total_size, control.plan.segment_size)
            .map_err(|e| fail(UploadFailure::Split)(e.into()))?;
        let negotiated = control.plan.clone();
        let uid = negotiated.uid.clone();
        info!(
            %uid,
            total_size,
            segment_size = plan.segment_size(),
            segments = plan.segment_count(),
            "split plan received"
        );

        let meter = Arc::new(ProgressMeter::new(
            total_size,
            plan.segment_count() as usize,
            progress.clone(),
        ));
        let policy = &self.config.rounds;
        let max_rounds = policy.max_rounds.max(1);
        let mut control = Some(control);

        for round in 1..=max_rounds {
            if round > 1 {
                tokio::time::sleep(policy.delay_after_round(round - 1)).await;
            }

            if control.is_none() {
                match self.reopen(&file_name, total_size, &negotiated).await {
                    Ok(c) => control = Some(c),
                    Err(e) => {
                        warn!(%uid, round, "cannot re-establish control connection: {e}");
                        continue;
                    }
                }
            }

            self.run_round(path.to_path_buf(), &uid, plan, &meter, round)
                .await;

            let Some(c) = control.as_mut() else {
                continue;
            };
            match self.request_end(&mut c.stream, &uid).await {
                Ok(EndReply::Success) => {
                    return Ok(UploadReport {
                        uid,
                        total_size,
                        segment_size: plan.segment_size(),
                        rounds: round,
                    });
                }
                Ok(EndReply::AssemblyFail) => {
                    return Err(fail(UploadFailure::Upload)(ClientError::AssemblyFailed));
                }
                Ok(EndReply::Fail) => {
                    info!(%uid, round, "upload incomplete, retrying");
                }
                Err(e) => {
                    warn!(%uid, round, "control connection lost: {e}");
                    control = None;
                }
            }
        }

        Err(fail(UploadFailure::Upload)(ClientError::RoundsExhausted(
            max_rounds,
        )))
    }

    /// Sends `big` and parses the plan.
    async fn request_plan(
        &self,
        mut stream: TcpStream,
        file_name: &str,
        total_size: u64,
    ) -> Result<Control, ClientError> {
        let command = Command::Big {
            file_name: file_name.to_string(),
            total_size,
        };
        write_message(&mut stream, command.encode()?.as_bytes(), self.config.write_timeout)
            .await?;
        let message = read_message(&mut stream, self.config.read_timeout)
            .await?
            .ok_or(ClientError::ServerClosed)?;
        let plan = PlanReply::parse(reply::reply_text(&message)?)?;
        Ok(Control { stream, plan })
    }

    /// Opens a fresh control connection for an upload already in progress.
    async fn reopen(
        &self,
        file_name: &str,
        total_size: u64,
        expected: &PlanReply,
    ) -> Result<Control, ClientError> {
        let stream = open_session(&self.config).await?;
        let control = self.request_plan(stream, file_name, total_size).await?;
        if control.plan != *expected {
            return Err(ClientError::PlanChanged);
        }
        Ok(control)
    }

    /// Uploads every segment in parallel and waits for all of them.
    async fn run_round(
        &self,
        path: PathBuf,
        uid: &str,
        plan: SplitPlan,
        meter: &Arc<ProgressMeter>,
        round: u32,
    ) {
        let mut tasks = JoinSet::new();
        for index in 0..plan.segment_count() {
            let config = Arc::clone(&self.config);
            let path = path.clone();
            let uid = uid.to_string();
            let meter = Arc::clone(meter);
            tasks.spawn(async move {
                let result = upload_segment(&config, &path, &uid, plan, index, &meter).await;
                (index, result)
            });
        }

        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((index, Err(e))) => {
                    failed += 1;
                    warn!(uid, index, round, "segment upload failed: {e}");
                }
                Err(e) => {
                    failed += 1;
                    warn!(uid, round, "segment task panicked: {e}");
                }
            }
        }
        info!(
            uid,
            round,
            failed,
            transferred = meter.transferred(),
            "round finished"
        );
    }

    async fn request_end(
        &self,
        stream: &mut TcpStream,
        uid: &str,
    ) -> Result<EndReply, ClientError> {
        let command = Command::End {
            uid: uid.to_string(),
            index: 0,
        };
        write_message(stream, command.encode()?.as_bytes(), self.config.write_timeout).await?;
        let message = read_message(stream, self.config.end_timeout)
            .await?
            .ok_or(ClientError::ServerClosed)?;
        Ok(EndReply::parse(reply::reply_text(&message)?)?)
    }
}

/// Checks the local file and returns its protocol name and size.
async fn inspect_file(path: &Path) -> Result<(String, u64), ClientError> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(ClientError::InvalidFile(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(ClientError::InvalidFile(format!("{} is empty", path.display())));
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ClientError::InvalidFile(format!("{} has no usable name", path.display())))?;
    validate_file_name(file_name)?;
    Ok((file_name.to_string(), meta.len()))
}
