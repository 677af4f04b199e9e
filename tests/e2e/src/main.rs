fn main() {
    println!("Run `cargo test -p splitup-e2e` to execute the end-to-end upload tests.");
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use splitup_client::{ClientConfig, ConnectPolicy, RoundPolicy, UploadReport, Uploader};
    use splitup_protocol::wire::{read_message, write_message};
    use splitup_protocol::{OffsetReply, PlanReply, reply};
    use splitup_server::{ServerConfig, StaticAuthenticator, UploadServer};
    use splitup_transfer::{Progress, UploadFailure, calculate_file_checksum, checksum_bytes};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    const T: Duration = Duration::from_secs(5);

    struct Fixture {
        _tmp: TempDir,
        source_dir: PathBuf,
        storage_dir: PathBuf,
        server: Arc<UploadServer>,
        addr: String,
    }

    impl Fixture {
        async fn start(segment_size: u64) -> Self {
            let tmp = TempDir::new().unwrap();
            let source_dir = tmp.path().join("source");
            let storage_dir = tmp.path().join("storage");
            std::fs::create_dir_all(&source_dir).unwrap();

            let config = ServerConfig {
                storage_dir: storage_dir.clone(),
                segment_size,
                ..ServerConfig::default()
            };
            let server = UploadServer::new(config, Arc::new(StaticAuthenticator::default()));
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            let runner = Arc::clone(&server);
            tokio::spawn(async move { runner.serve(listener).await });

            Self {
                _tmp: tmp,
                source_dir,
                storage_dir,
                server,
                addr,
            }
        }

        fn write_source(&self, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let path = self.source_dir.join(name);
            std::fs::write(&path, &data).unwrap();
            (path, data)
        }

        fn client_config(&self) -> ClientConfig {
            ClientConfig {
                server_addr: self.addr.clone(),
                connect: ConnectPolicy {
                    attempts: 3,
                    retry_delay: Duration::from_millis(20),
                    connect_timeout: Duration::from_secs(1),
                },
                rounds: RoundPolicy {
                    max_rounds: 3,
                    initial_delay: Duration::from_millis(20),
                    ..RoundPolicy::default()
                },
                close_timeout: T,
                ..ClientConfig::default()
            }
        }

        async fn upload(&self, path: &Path) -> (Result<UploadReport, UploadFailure>, Vec<Progress>) {
            self.upload_with(self.client_config(), path).await
        }

        async fn upload_with(
            &self,
            config: ClientConfig,
            path: &Path,
        ) -> (Result<UploadReport, UploadFailure>, Vec<Progress>) {
            let (tx, mut rx) = mpsc::channel(1024);
            let collector = tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(p) = rx.recv().await {
                    seen.push(p);
                }
                seen
            });
            let result = Uploader::new(config)
                .upload(path, tx)
                .await
                .map_err(|e| e.failure);
            (result, collector.await.unwrap())
        }

        fn stored(&self, name: &str) -> PathBuf {
            self.storage_dir.join(name)
        }
    }

    /// Opens a logged-in raw connection.
    async fn raw_login(addr: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_message(&mut stream, b"login client 12345", T).await.unwrap();
        let reply = read_message(&mut stream, T).await.unwrap().unwrap();
        assert_eq!(reply, b"success");
        stream
    }

    async fn raw_big(addr: &str, name: &str, size: u64) -> (TcpStream, PlanReply) {
        let mut stream = raw_login(addr).await;
        write_message(&mut stream, format!("big {name} {size}").as_bytes(), T)
            .await
            .unwrap();
        let message = read_message(&mut stream, T).await.unwrap().unwrap();
        let plan = PlanReply::parse(reply::reply_text(&message).unwrap()).unwrap();
        (stream, plan)
    }

    /// Claims a segment, sends `data`, and waits for the server to close.
    /// Returns the resume offset the server reported.
    async fn raw_segment(addr: &str, uid: &str, index: u64, data: &[u8]) -> u64 {
        let mut stream = raw_login(addr).await;
        write_message(&mut stream, format!("split {uid} {index}").as_bytes(), T)
            .await
            .unwrap();
        let message = read_message(&mut stream, T).await.unwrap().unwrap();
        let OffsetReply::Offset(offset) = OffsetReply::parse(reply::reply_text(&message).unwrap()).unwrap()
        else {
            panic!("server exception for segment {index}");
        };
        stream.write_all(data).await.unwrap();
        stream.shutdown().await.unwrap();
        while read_message(&mut stream, T).await.unwrap().is_some() {}
        offset
    }

    async fn raw_end(control: &mut TcpStream, uid: &str) -> String {
        write_message(control, format!("end {uid} 0").as_bytes(), T)
            .await
            .unwrap();
        let message = read_message(control, T).await.unwrap().unwrap();
        reply::reply_text(&message).unwrap().to_string()
    }

    fn assert_progress_shape(progress: &[Progress], terminal: Progress) {
        let (last, rest) = progress.split_last().expect("no progress reported");
        assert_eq!(*last, terminal);
        let mut previous = 0u8;
        for p in rest {
            match p {
                Progress::Percent(v) => {
                    assert!(*v >= previous && *v < 100, "bad intermediate {p:?}");
                    previous = *v;
                }
                Progress::Failed(_) => panic!("failure before the terminal value"),
            }
        }
    }

    #[tokio::test]
    async fn three_segments_upload_in_one_round() {
        let fx = Fixture::start(1000).await;
        let (path, data) = fx.write_source("data.bin", 3000);

        let (result, progress) = fx.upload(&path).await;
        let report = result.unwrap();
        assert_eq!(report.uid, "client_data.bin");
        assert_eq!(report.rounds, 1);
        assert_eq!(report.segment_size, 1000);
        assert_progress_shape(&progress, Progress::Percent(100));

        let assembled = fx.stored("client_data.bin");
        assert_eq!(std::fs::metadata(&assembled).unwrap().len(), 3000);
        assert_eq!(
            calculate_file_checksum(&assembled).await.unwrap(),
            checksum_bytes(&data)
        );
        for index in 0..3 {
            assert!(!fx.stored(&format!("client_data.bin_{index}")).exists());
        }
        assert!(fx.server.registry().is_empty());
    }

    #[tokio::test]
    async fn uneven_file_assembles_with_short_tail() {
        let fx = Fixture::start(1024).await;
        let (path, data) = fx.write_source("tail.bin", 2500);

        let (result, _) = fx.upload(&path).await;
        assert_eq!(result.unwrap().rounds, 1);
        assert_eq!(std::fs::read(fx.stored("client_tail.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn interrupted_segment_resumes_at_stored_offset() {
        let fx = Fixture::start(1000).await;
        let (path, data) = fx.write_source("data.bin", 3000);

        // A first attempt dies after 400 bytes of segment 1.
        let (control, plan) = raw_big(&fx.addr, "data.bin", 3000).await;
        assert_eq!(raw_segment(&fx.addr, &plan.uid, 1, &data[1000..1400]).await, 0);
        assert_eq!(
            std::fs::metadata(fx.stored("client_data.bin_1")).unwrap().len(),
            400
        );
        assert_eq!(raw_segment(&fx.addr, &plan.uid, 1, &[]).await, 400);
        drop(control);
        wait_until_idle(&fx).await;

        let (result, progress) = fx.upload(&path).await;
        assert_eq!(result.unwrap().rounds, 1);
        assert_progress_shape(&progress, Progress::Percent(100));
        assert_eq!(std::fs::read(fx.stored("client_data.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn failed_segment_is_retried_in_a_later_round() {
        let fx = Fixture::start(1000).await;
        let (path, data) = fx.write_source("data.bin", 3000);

        // A directory where segment 1 belongs makes the server answer
        // `server exception` for it until the directory goes away.
        let blocker = fx.stored("client_data.bin_1");
        std::fs::create_dir_all(&blocker).unwrap();
        let unblock = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            std::fs::remove_dir(&blocker).unwrap();
        });

        let config = ClientConfig {
            rounds: RoundPolicy {
                max_rounds: 10,
                initial_delay: Duration::from_millis(100),
                ..RoundPolicy::default()
            },
            ..fx.client_config()
        };
        let (result, progress) = fx.upload_with(config, &path).await;
        unblock.await.unwrap();

        let report = result.unwrap();
        assert!(report.rounds >= 2, "finished in round {}", report.rounds);
        assert_progress_shape(&progress, Progress::Percent(100));
        assert!(progress.contains(&Progress::Percent(66)));
        assert_eq!(std::fs::read(fx.stored("client_data.bin")).unwrap(), data);
        assert!(fx.server.registry().is_empty());
    }

    #[tokio::test]
    async fn exhausted_rounds_report_upload_failure() {
        let fx = Fixture::start(1000).await;
        let (path, _) = fx.write_source("data.bin", 3000);
        std::fs::create_dir_all(fx.stored("client_data.bin_2")).unwrap();

        let (result, progress) = fx.upload(&path).await;
        assert_eq!(result.unwrap_err(), UploadFailure::Upload);
        assert_progress_shape(&progress, Progress::Failed(UploadFailure::Upload));
        assert_eq!(
            progress.iter().filter(|p| p.is_terminal()).count(),
            1,
            "{progress:?}"
        );
        assert!(!fx.stored("client_data.bin").exists());
        assert_eq!(
            std::fs::metadata(fx.stored("client_data.bin_0")).unwrap().len(),
            1000
        );

        // Dropping the control connection tears the session down.
        wait_until_idle(&fx).await;
    }

    #[tokio::test]
    async fn end_succeeds_only_once_every_segment_is_stored() {
        let fx = Fixture::start(1000).await;
        let (_, data) = fx.write_source("data.bin", 3000);
        let (mut control, plan) = raw_big(&fx.addr, "data.bin", 3000).await;

        assert_eq!(raw_end(&mut control, &plan.uid).await, "fail");

        raw_segment(&fx.addr, &plan.uid, 2, &data[2000..]).await;
        raw_segment(&fx.addr, &plan.uid, 0, &data[..1000]).await;
        assert_eq!(raw_end(&mut control, &plan.uid).await, "fail");

        raw_segment(&fx.addr, &plan.uid, 1, &data[1000..1700]).await;
        assert_eq!(raw_end(&mut control, &plan.uid).await, "fail");

        raw_segment(&fx.addr, &plan.uid, 1, &data[1700..2000]).await;
        assert_eq!(raw_end(&mut control, &plan.uid).await, "success");

        assert_eq!(std::fs::read(fx.stored("client_data.bin")).unwrap(), data);
        assert!(fx.server.registry().is_empty());
    }

    #[tokio::test]
    async fn duplicate_upload_is_rejected_while_first_is_live() {
        let fx = Fixture::start(1000).await;
        let (path, _) = fx.write_source("data.bin", 3000);
        let (_control, _) = raw_big(&fx.addr, "data.bin", 3000).await;

        let (result, progress) = fx.upload(&path).await;
        assert_eq!(result.unwrap_err(), UploadFailure::Split);
        assert_eq!(progress, vec![Progress::Failed(UploadFailure::Split)]);
        assert_eq!(fx.server.registry().len(), 1);
    }

    #[tokio::test]
    async fn same_file_can_be_uploaded_again_after_success() {
        let fx = Fixture::start(1000).await;
        let (path, _) = fx.write_source("data.bin", 1500);
        assert!(fx.upload(&path).await.0.is_ok());

        let (path, data) = fx.write_source("data.bin", 2200);
        assert!(fx.upload(&path).await.0.is_ok());
        assert_eq!(std::fs::read(fx.stored("client_data.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn wrong_secret_reports_auth_failure() {
        let fx = Fixture::start(1000).await;
        let (path, _) = fx.write_source("data.bin", 100);
        let config = ClientConfig {
            secret: "wrong".into(),
            ..fx.client_config()
        };

        let (result, progress) = fx.upload_with(config, &path).await;
        assert_eq!(result.unwrap_err(), UploadFailure::Auth);
        assert_eq!(progress, vec![Progress::Failed(UploadFailure::Auth)]);
    }

    #[tokio::test]
    async fn parallel_jobs_for_different_files() {
        let fx = Fixture::start(700).await;
        let (a, data_a) = fx.write_source("a.bin", 5000);
        let (b, data_b) = fx.write_source("b.bin", 3100);

        let ((ra, _), (rb, _)) = tokio::join!(fx.upload(&a), fx.upload(&b));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(std::fs::read(fx.stored("client_a.bin")).unwrap(), data_a);
        assert_eq!(std::fs::read(fx.stored("client_b.bin")).unwrap(), data_b);
    }

    /// Waits for the server to drop sessions whose control connection closed.
    async fn wait_until_idle(fx: &Fixture) {
        for _ in 0..100 {
            if fx.server.registry().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sessions still registered");
    }
}
