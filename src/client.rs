use std::time::Duration;

use log::{debug, info};
use payment_protos::payment::{
    payment_service_client::PaymentServiceClient, GetPaymentRequest, ListPaymentsRequest, Payment,
    PaymentEvent, PaymentStatus, Provider,
};
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tonic::{transport::Channel, Code, Status, Streaming};

use crate::channel::{ChannelManager, ConnectionError, ConnectionState};

/// Sent when a list call leaves the limit unspecified.
pub const DEFAULT_LIST_LIMIT: i32 = 10;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("RpcError {code:?}: {message}")]
pub struct RpcError {
    pub code: Code,
    pub message: String,
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Not connected to the payment service")]
    NotConnected,
    #[error("InvalidArgument {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Rpc(#[from] RpcError),
}

impl From<Status> for RequestError {
    fn from(status: Status) -> Self {
        Self::Rpc(status.into())
    }
}

/// Terminal error carried by a payment stream.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("StreamError {0}")]
pub struct StreamError(pub RpcError);

impl From<Status> for StreamError {
    fn from(status: Status) -> Self {
        Self(status.into())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub provider: Option<Provider>,
    pub status: Option<PaymentStatus>,
    pub limit: Option<i32>,
}

impl ListFilter {
    // an explicit limit of 0 is forwarded untouched, the server decides what it means
    fn to_request(self) -> ListPaymentsRequest {
        ListPaymentsRequest {
            provider: self.provider.unwrap_or(Provider::Unknown) as i32,
            status: self.status.unwrap_or(PaymentStatus::Unknown) as i32,
            limit: self.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamFilter {
    pub provider: Option<Provider>,
}

impl StreamFilter {
    fn to_request(self) -> ListPaymentsRequest {
        ListPaymentsRequest {
            provider: self.provider.unwrap_or(Provider::Unknown) as i32,
            status: PaymentStatus::Unknown as i32,
            limit: 0,
        }
    }
}

#[derive(Debug)]
pub enum StreamSignal {
    Event(PaymentEvent),
    /// Server closed the stream gracefully.
    End,
    Error(StreamError),
}

/// Server-driven sequence of payment events.
///
/// Yields every event in arrival order, then exactly one [`StreamSignal::End`] or
/// [`StreamSignal::Error`], then `None` forever. [`PaymentEventStream::cancel`] stops delivery
/// without producing a terminal signal.
pub struct PaymentEventStream<S = Streaming<PaymentEvent>> {
    inner: Option<S>,
}

impl<S> PaymentEventStream<S>
where
    S: Stream<Item = Result<PaymentEvent, Status>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn next_signal(&mut self) -> Option<StreamSignal> {
        let inner = self.inner.as_mut()?;
        let signal = match inner.next().await {
            Some(Ok(event)) => return Some(StreamSignal::Event(event)),
            Some(Err(status)) => StreamSignal::Error(status.into()),
            None => StreamSignal::End,
        };
        self.inner = None;
        Some(signal)
    }

    /// Drops the underlying stream, which resets the call on the wire.
    /// Returns false if the stream had already terminated or been cancelled.
    pub fn cancel(&mut self) -> bool {
        let was_open = self.inner.take().is_some();
        if was_open {
            debug!("Payment stream cancelled");
        }
        was_open
    }
}

/// Typed facade over the payment service RPCs.
#[derive(Debug)]
pub struct PaymentClient {
    channel: ChannelManager,
}

impl PaymentClient {
    pub fn new(channel: ChannelManager) -> Self {
        Self { channel }
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn address(&self) -> &str {
        self.channel.address()
    }

    pub async fn connect(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        self.channel.connect(timeout).await
    }

    pub fn close(&mut self) {
        self.channel.close()
    }

    fn rpc_client(&self) -> Result<PaymentServiceClient<Channel>, RequestError> {
        self.channel
            .channel()
            .map(PaymentServiceClient::new)
            .ok_or(RequestError::NotConnected)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment, RequestError> {
        let mut client = self.rpc_client()?;
        if payment_id.is_empty() {
            return Err(RequestError::InvalidArgument(
                "payment id must not be empty".to_string(),
            ));
        }
        let response = client
            .get_payment(GetPaymentRequest {
                payment_id: payment_id.to_string(),
            })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn list_payments(&self, filter: ListFilter) -> Result<Vec<Payment>, RequestError> {
        let mut client = self.rpc_client()?;
        let response = client.list_payments(filter.to_request()).await?;
        let list = response.into_inner();
        debug!(
            "Listed {} payments (server total_count {})",
            list.payments.len(),
            list.total_count
        );
        Ok(list.payments)
    }

    /// Opens an independent stream. Each call starts a new subscription.
    pub async fn stream_payments(
        &self,
        filter: StreamFilter,
    ) -> Result<PaymentEventStream, RequestError> {
        let mut client = self.rpc_client()?;
        let request = filter.to_request();
        info!("Subscribing to payment stream with provider filter {}", request.provider);
        let response = client.stream_payments(request).await?;
        Ok(PaymentEventStream::new(response.into_inner()))
    }
}
