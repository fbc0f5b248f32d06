use std::{future::Future, time::Duration};

use log::{debug, error, info, warn};
use payment_protos::payment::PaymentEvent;
use thiserror::Error;
use tokio_stream::Stream;
use tonic::Status;

use crate::{
    channel::ConnectionError,
    client::{
        PaymentClient, PaymentEventStream, RequestError, StreamError, StreamFilter, StreamSignal,
    },
    presenter::{EventLine, Presenter},
    stats::{SessionReport, SessionStats},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Streaming,
    Draining,
    Terminated,
}

#[derive(Debug, Error)]
pub enum ShutdownCause {
    /// SIGINT or SIGTERM.
    #[error("shutdown signal received")]
    Signal,
    /// Server closed the stream gracefully.
    #[error("stream ended by server")]
    StreamEnded,
    #[error("stream failed: {0}")]
    StreamFailed(StreamError),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(RequestError),
    #[error("connect failed: {0}")]
    ConnectFailed(ConnectionError),
}

impl ShutdownCause {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownCause::Signal | ShutdownCause::StreamEnded => 0,
            ShutdownCause::StreamFailed(_)
            | ShutdownCause::SubscribeFailed(_)
            | ShutdownCause::ConnectFailed(_) => 1,
        }
    }
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub cause: ShutdownCause,
    pub report: SessionReport,
    /// Every state the session passed through, starting at `Idle`.
    pub states: Vec<LifecycleState>,
}

impl SessionOutcome {
    pub fn exit_code(&self) -> i32 {
        self.cause.exit_code()
    }
}

/// Drives one subscription from connect to the final report.
///
/// The session is consumed by [`Session::finish`], so the summary is presented exactly once
/// whichever way the session ends.
pub struct Session<P> {
    states: Vec<LifecycleState>,
    stats: SessionStats,
    presenter: P,
}

impl<P: Presenter> Session<P> {
    pub fn new(presenter: P) -> Self {
        Self {
            states: vec![LifecycleState::Idle],
            stats: SessionStats::new(),
            presenter,
        }
    }

    fn state(&self) -> LifecycleState {
        self.states
            .last()
            .copied()
            .unwrap_or(LifecycleState::Idle)
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Session {:?} -> {:?}", self.state(), next);
        self.states.push(next);
    }

    pub async fn run<F>(
        mut self,
        client: &mut PaymentClient,
        filter: StreamFilter,
        connect_timeout: Duration,
        shutdown: F,
    ) -> SessionOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        self.transition(LifecycleState::Connecting);
        let connected = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = client.connect(connect_timeout) => Some(result),
        };
        match connected {
            None => {
                info!("Shutdown requested while connecting");
                client.close();
                return self.finish(ShutdownCause::Signal);
            }
            Some(Err(e)) => {
                error!("Failed to start payment stream client: {e}");
                return self.finish(ShutdownCause::ConnectFailed(e));
            }
            Some(Ok(())) => {}
        }

        self.transition(LifecycleState::Streaming);
        let subscribed = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = client.stream_payments(filter) => Some(result),
        };
        let cause = match subscribed {
            None => ShutdownCause::Signal,
            Some(Err(e)) => {
                error!("Failed to subscribe to payment stream: {e}");
                ShutdownCause::SubscribeFailed(e)
            }
            Some(Ok(mut events)) => {
                info!("Waiting for payments...");
                let cause = self.consume(&mut events, shutdown.as_mut()).await;
                events.cancel();
                cause
            }
        };

        self.transition(LifecycleState::Draining);
        client.close();
        self.finish(cause)
    }

    /// Classifies events in delivery order until a terminal signal or `shutdown` fires.
    /// No event is accepted once shutdown has been observed.
    pub async fn consume<S, F>(
        &mut self,
        events: &mut PaymentEventStream<S>,
        mut shutdown: F,
    ) -> ShutdownCause
    where
        S: Stream<Item = Result<PaymentEvent, Status>> + Unpin,
        F: Future<Output = ()> + Unpin,
    {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutting down...");
                    return ShutdownCause::Signal;
                }
                signal = events.next_signal() => match signal {
                    Some(StreamSignal::Event(event)) => self.accept(&event),
                    Some(StreamSignal::End) => {
                        info!("Stream ended by server");
                        return ShutdownCause::StreamEnded;
                    }
                    Some(StreamSignal::Error(e)) => {
                        error!("Stream error: {e}");
                        return ShutdownCause::StreamFailed(e);
                    }
                    None => {
                        warn!("Payment stream already closed");
                        return ShutdownCause::StreamEnded;
                    }
                },
            }
        }
    }

    fn accept(&mut self, event: &PaymentEvent) {
        let kind = self.stats.on_event(event);
        let line = EventLine::new(event, kind);
        debug!("Received {} event for payment {}", kind.as_str(), line.payment_id);
        self.presenter.present_event(&line);
    }

    fn finish(mut self, cause: ShutdownCause) -> SessionOutcome {
        self.transition(LifecycleState::Terminated);
        let report = self.stats.report();
        self.presenter.present_summary(&report);
        info!(
            "Exiting payment stream client, {} payments received ({} new, {} existing) in {:.1}s.",
            report.total,
            report.new,
            report.existing,
            report.elapsed.as_secs_f64()
        );
        SessionOutcome {
            cause,
            report,
            states: self.states,
        }
    }
}
