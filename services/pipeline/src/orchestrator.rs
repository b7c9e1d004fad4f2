//! Pipeline Orchestrator: owns the upstream socket, drives frame decoding,
//! dispatches events against the feature store, triggers inference and
//! paging, and supervises reconnects and graceful shutdown (spec §4.7).

use crate::inference::{PredictError, Predictor, Prediction};
use crate::metrics::{
    monitor_db_operation, APPLICATION_ERRORS_TOTAL, MESSAGES_PROCESSED_TOTAL,
    MESSAGE_PROCESSING_SECONDS, PREDICTIONS_MADE_TOTAL, SOCKET_TIMEOUTS, SYSTEM_HEALTH_STATUS,
};
use crate::pager::{PagerClient, PagerOutcome};
use aki_core::{decode_message, extract_frames, Date, Event};
use aki_store::{LabResultOutcome, Store, StoreError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Socket read timeout (`TIMEOUT` in the reference implementation).
const READ_TIMEOUT: Duration = Duration::from_secs(20);
/// Delay before reconnecting after a non-timeout socket error (`DELAY_RETRY`).
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

pub struct Orchestrator<P: Predictor> {
    mllp_address: String,
    store: Store,
    predictor: P,
    pager: PagerClient,
}

enum ConnectionOutcome {
    GracefulShutdown,
    Timeout,
    Closed,
    Error(std::io::Error),
}

impl<P: Predictor> Orchestrator<P> {
    pub fn new(mllp_address: String, store: Store, predictor: P, pager: PagerClient) -> Self {
        Orchestrator {
            mllp_address,
            store,
            predictor,
            pager,
        }
    }

    /// Run the reconnect/serve loop until `shutdown` reports a shutdown
    /// request, returning only once the connection is closed cleanly.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested before connecting, exiting");
                return;
            }

            let stream = match TcpStream::connect(&self.mllp_address).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!(error = %err, "failed to connect to upstream, retrying");
                    SYSTEM_HEALTH_STATUS.with_label_values(&["orchestrator"]).set(0);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            SYSTEM_HEALTH_STATUS.with_label_values(&["orchestrator"]).set(1);
            tracing::info!(address = %self.mllp_address, "connected to upstream");

            match self.serve_connection(stream, &mut shutdown).await {
                ConnectionOutcome::GracefulShutdown => {
                    tracing::info!("graceful shutdown, closing connection");
                    return;
                }
                ConnectionOutcome::Timeout => {
                    SOCKET_TIMEOUTS.with_label_values(&["orchestrator"]).inc();
                    // Reconnect silently, no delay, no log spam.
                }
                ConnectionOutcome::Closed => {
                    tracing::info!("upstream closed the connection");
                }
                ConnectionOutcome::Error(err) => {
                    tracing::error!(error = %err, "socket error, reconnecting");
                    SYSTEM_HEALTH_STATUS.with_label_values(&["orchestrator"]).set(0);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn serve_connection(
        &mut self,
        mut stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionOutcome {
        let mut buffer: Vec<u8> = Vec::new();
        let mut read_buf = [0u8; 4096];

        loop {
            if *shutdown.borrow() {
                return ConnectionOutcome::GracefulShutdown;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return ConnectionOutcome::GracefulShutdown;
                    }
                }
                read_result = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut read_buf)) => {
                    match read_result {
                        Err(_elapsed) => return ConnectionOutcome::Timeout,
                        Ok(Ok(0)) => return ConnectionOutcome::Closed,
                        Ok(Ok(n)) => {
                            buffer.extend_from_slice(&read_buf[..n]);
                            let (frames, leftover) = extract_frames(&buffer);
                            buffer = leftover;
                            for frame in frames {
                                let commit_ok = self.handle_frame(&frame).await;
                                // A storage fault withholds the acknowledgement so the
                                // upstream may resend; decode errors still ack (spec §7).
                                if commit_ok {
                                    if let Err(err) = stream.write_all(aki_core::ACK_FRAME).await {
                                        return ConnectionOutcome::Error(err);
                                    }
                                }
                            }
                        }
                        Ok(Err(err)) => return ConnectionOutcome::Error(err),
                    }
                }
            }
        }
    }

    /// Handles one decoded frame end to end, returning whether the upstream
    /// should be acknowledged for it. Decode errors still ack (they are
    /// skippable, not retried); a storage fault withholds the ack so the
    /// upstream may resend the frame (spec §7).
    async fn handle_frame(&mut self, frame: &[u8]) -> bool {
        let today = today();
        let decoded = decode_message(frame, today);

        let message_type = decoded
            .as_ref()
            .map(Event::metric_label)
            .unwrap_or("decode_error")
            .to_owned();
        let timer = MESSAGE_PROCESSING_SECONDS
            .with_label_values(&[&message_type])
            .start_timer();

        let ack = match decoded {
            Ok(event) => {
                MESSAGES_PROCESSED_TOTAL.with_label_values(&[&message_type]).inc();
                self.dispatch(event).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode upstream frame");
                APPLICATION_ERRORS_TOTAL
                    .with_label_values(&["decode", "decoder"])
                    .inc();
                true
            }
        };
        timer.observe_duration();
        ack
    }

    async fn dispatch(&mut self, event: Event) -> bool {
        match event {
            Event::Admission { identity, sex, age } => {
                match monitor_db_operation("apply_admission", || self.store.apply_admission(&identity, sex, age)) {
                    Ok(_) => true,
                    Err(err) => {
                        self.report_store_error("apply_admission", &err);
                        false
                    }
                }
            }
            Event::LabResult {
                identity,
                creatinine_value,
                observation_timestamp,
            } => {
                self.handle_lab_result(&identity, creatinine_value, &observation_timestamp)
                    .await
            }
            Event::Discharge { identity } => {
                match monitor_db_operation("discharge", || self.store.discharge(&identity)) {
                    Ok(()) => true,
                    Err(err) => {
                        self.report_store_error("discharge", &err);
                        false
                    }
                }
            }
            Event::Acknowledgement | Event::Unknown { .. } => true,
        }
    }

    async fn handle_lab_result(
        &mut self,
        identity: &aki_core::PatientIdentity,
        value: f64,
        timestamp: &str,
    ) -> bool {
        let outcome = match monitor_db_operation("apply_lab_result", || {
            self.store.apply_lab_result(identity, value, timestamp)
        }) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report_store_error("apply_lab_result", &err);
                return false;
            }
        };

        let mut record = match outcome {
            LabResultOutcome::SeededNew(_) => return true,
            LabResultOutcome::ExistingPrior(record) => record,
        };

        aki_core::apply_event(
            &mut record,
            &Event::LabResult {
                identity: identity.clone(),
                creatinine_value: value,
                observation_timestamp: timestamp.to_owned(),
            },
        );

        if record.ready_for_inference {
            match self.predictor.predict(&record) {
                Ok(prediction) => {
                    let label = match prediction {
                        Prediction::Positive => "positive",
                        Prediction::Negative => "negative",
                    };
                    PREDICTIONS_MADE_TOTAL.with_label_values(&[label]).inc();

                    if prediction == Prediction::Positive {
                        let outcome = self.pager.notify(identity.as_str(), timestamp).await;
                        log_pager_outcome(identity, outcome);
                    }
                    // Reset readiness so the next lab result re-triggers
                    // inference exactly once per completing event.
                    record.ready_for_inference = false;
                }
                Err(err) => {
                    self.report_predict_error(&err);
                }
            }
        }

        match monitor_db_operation("commit_feature", || self.store.commit_feature(&record)) {
            Ok(()) => true,
            Err(err) => {
                self.report_store_error("commit_feature", &err);
                false
            }
        }
    }

    fn report_store_error(&self, operation: &str, err: &StoreError) {
        tracing::error!(operation, error = %err, "feature store operation failed");
        APPLICATION_ERRORS_TOTAL
            .with_label_values(&["storage_fault", operation])
            .inc();
    }

    fn report_predict_error(&self, err: &PredictError) {
        tracing::error!(error = %err, "predictor raised an error");
        APPLICATION_ERRORS_TOTAL
            .with_label_values(&["predict_error", "inference"])
            .inc();
    }
}

fn log_pager_outcome(identity: &aki_core::PatientIdentity, outcome: PagerOutcome) {
    match outcome {
        PagerOutcome::Success => tracing::info!(%identity, "pager notified"),
        PagerOutcome::TransientFailure => {
            tracing::warn!(%identity, "pager transient failure, dropped after retry")
        }
        PagerOutcome::PermanentFailure => {
            tracing::warn!(%identity, "pager permanent failure")
        }
    }
}

fn today() -> Date {
    use chrono::Datelike;
    let now = chrono::Local::now().date_naive();
    Date::new(now.year(), now.month(), now.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::FixedPredictor;
    use aki_core::{frame_message, PatientIdentity, Sex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn hl7_admission(pid: &str) -> Vec<u8> {
        let msg = format!(
            "MSH|^~\\&|SIM|SIM_FAC|APP|FAC|20250205090000||ADT^A01|1|P|2.3\rPID|1||{pid}||Doe^Jane||19900101|M\r"
        );
        frame_message(msg.as_bytes())
    }

    fn hl7_lab(pid: &str, value: &str) -> Vec<u8> {
        let msg = format!(
            "MSH|^~\\&|SIM|SIM_FAC|APP|FAC|20250205123000||ORU^R01|1|P|2.3\rPID|1||{pid}\rOBR|1|||||20250205123000\rOBX|1|NM|CREATININE||{value}\r"
        );
        frame_message(msg.as_bytes())
    }

    #[tokio::test]
    async fn full_admission_then_lab_result_completes_a_feature_record() {
        let store = Store::open_in_memory().unwrap();
        let predictor = FixedPredictor {
            outcome: Prediction::Negative,
        };
        let pager = PagerClient::new("127.0.0.1:1");
        let mut orchestrator = Orchestrator::new("unused".into(), store, predictor, pager);

        orchestrator.handle_frame(&hl7_admission("9001")[1..hl7_admission("9001").len() - 2]).await;
        orchestrator.handle_frame(&hl7_lab("9001", "1.2")[1..hl7_lab("9001", "1.2").len() - 2]).await;

        let record = orchestrator
            .store
            .lookup_feature(&PatientIdentity::from("9001"))
            .unwrap()
            .unwrap();
        assert_eq!(record.sex, Some(Sex::Male));
        assert_eq!(record.sample_count, 1);
        assert!(record.ready_for_inference, "readiness should have been observed before the reset");
    }

    #[tokio::test]
    async fn positive_prediction_pages_and_resets_readiness_before_commit() {
        let store = Store::open_in_memory().unwrap();
        let predictor = FixedPredictor {
            outcome: Prediction::Positive,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await;
        });
        let pager = PagerClient::new(&addr);
        let mut orchestrator = Orchestrator::new("unused".into(), store, predictor, pager);

        let admission = hl7_admission("9002");
        orchestrator.handle_frame(&admission[1..admission.len() - 2]).await;
        let lab = hl7_lab("9002", "3.0");
        orchestrator.handle_frame(&lab[1..lab.len() - 2]).await;

        let record = orchestrator
            .store
            .lookup_feature(&PatientIdentity::from("9002"))
            .unwrap()
            .unwrap();
        assert!(!record.ready_for_inference, "readiness must be reset after a dispatched inference");
    }

    #[tokio::test]
    async fn decode_error_is_counted_and_does_not_crash_the_loop() {
        let store = Store::open_in_memory().unwrap();
        let predictor = FixedPredictor {
            outcome: Prediction::Negative,
        };
        let pager = PagerClient::new("127.0.0.1:1");
        let mut orchestrator = Orchestrator::new("unused".into(), store, predictor, pager);
        orchestrator.handle_frame(b"not a valid hl7 payload").await;
    }
}
