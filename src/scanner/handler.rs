//! Reaction to a decoded scan: show it, then forward it to the server

use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

use super::display::ResultDisplay;
use crate::client::AttendanceClient;

/// Text placed before the decoded content on the result line
pub const RESULT_PREFIX: &str = "Codigo escaneado";

/// Result line for a decoded text
pub fn result_text(decoded: &str) -> String {
    format!("{}{}", RESULT_PREFIX, decoded)
}

/// Displays each decoded text and posts it to the attendance endpoint
#[derive(Clone)]
pub struct ScanHandler {
    display: Arc<dyn ResultDisplay>,
    client: AttendanceClient,
}

impl ScanHandler {
    pub fn new(display: Arc<dyn ResultDisplay>, client: AttendanceClient) -> Self {
        Self { display, client }
    }

    /// Handle one decoded text
    ///
    /// The display is updated synchronously; the POST runs as its own task and
    /// is not ordered against requests from earlier or later scans. Must be
    /// called within a tokio runtime.
    pub fn on_scan_decoded(&self, decoded: &str, tasks: &mut ScanTasks) {
        self.display.show(&result_text(decoded));
        tasks.spawn(post_and_log(self.client.clone(), decoded.to_string()));
    }
}

async fn post_and_log(client: AttendanceClient, decoded: String) {
    match client.post_scan(&decoded).await {
        Ok(response) => log::info!("{}", response),
        Err(e) => log::error!("error: {}", e),
    }
}

/// Scan requests still in flight
///
/// Finished requests are dropped on every spawn, so a long session only
/// holds the ones that have not completed yet.
#[derive(Default)]
pub struct ScanTasks {
    set: JoinSet<()>,
}

impl ScanTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.set.spawn(task);
    }

    /// Drop every task that has already completed
    pub fn reap(&mut self) {
        while let Some(result) = self.set.try_join_next() {
            log_join(result);
        }
    }

    /// Tasks not yet reaped
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Wait for every remaining task
    pub async fn drain(&mut self) {
        while let Some(result) = self.set.join_next().await {
            log_join(result);
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        log::error!("Scan request task failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::display::MemoryDisplay;
    use crate::store::{NewStudent, Roster};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_result_text_prefix() {
        for decoded in ["19210001", "", " spaced ", "Codigo escaneado"] {
            let text = result_text(decoded);
            assert_eq!(text, format!("Codigo escaneado{}", decoded));
            assert_eq!(text.strip_prefix(RESULT_PREFIX), Some(decoded));
        }
    }

    #[tokio::test]
    async fn test_scan_reaches_server_and_updates_display() {
        static STOP: AtomicBool = AtomicBool::new(false);

        let roster = Roster::open_in_memory().unwrap();
        roster
            .insert(&NewStudent {
                numero_control: "19210001".to_string(),
                nombre: "Ana".to_string(),
                carrera: "ISC".to_string(),
                semestre: "5".to_string(),
                avance_reticular: "60".to_string(),
            })
            .unwrap();
        let roster = Arc::new(roster);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(crate::server::serve_on(listener, roster.clone(), &STOP));

        let display = Arc::new(MemoryDisplay::new());
        let client = AttendanceClient::new(&base_url, Duration::from_secs(5)).unwrap();
        let handler = ScanHandler::new(display.clone(), client);

        let mut tasks = ScanTasks::new();
        handler.on_scan_decoded("19210001", &mut tasks);
        handler.on_scan_decoded("00000000", &mut tasks);
        assert_eq!(display.current().as_deref(), Some("Codigo escaneado00000000"));

        tasks.drain().await;
        assert!(roster.find("19210001").unwrap().unwrap().asistencia);

        STOP.store(true, std::sync::atomic::Ordering::Relaxed);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_post_does_not_panic() {
        let display = Arc::new(MemoryDisplay::new());
        let client = AttendanceClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let handler = ScanHandler::new(display.clone(), client);

        let mut tasks = ScanTasks::new();
        handler.on_scan_decoded("19210001", &mut tasks);
        assert_eq!(display.current().as_deref(), Some("Codigo escaneado19210001"));
        assert_eq!(tasks.len(), 1);

        tasks.drain().await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_scan_tasks_reaps_finished() {
        let mut tasks = ScanTasks::new();
        for _ in 0..100 {
            tasks.spawn(async {});
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The next spawn drops everything already done
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tasks.spawn(async move {
            let _ = rx.await;
        });
        assert_eq!(tasks.len(), 1);

        tx.send(()).unwrap();
        tasks.drain().await;
        assert!(tasks.is_empty());
    }
}
