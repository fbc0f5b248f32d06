use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use payment_protos::payment::{
    payment_service_server::{PaymentService, PaymentServiceServer},
    GetPaymentRequest, ListPaymentsRequest, Payment, PaymentEvent, PaymentList, PaymentStatus,
    Provider,
};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{
    transport::{Channel, Endpoint, Server},
    Code, Request, Response, Status,
};

use crate::channel::ConnectFuture;

pub fn payment(id: &str, provider: Provider, status: PaymentStatus) -> Payment {
    Payment {
        id: id.to_string(),
        provider: provider as i32,
        amount: 99.99,
        currency: "USD".to_string(),
        status: status as i32,
        customer_email: "customer@example.com".to_string(),
        created_at: 1_700_000_000,
        processed_at: 1_700_000_001,
        metadata: HashMap::new(),
    }
}

pub fn event(id: &str, event_type: &str) -> PaymentEvent {
    PaymentEvent {
        payment: Some(payment(id, Provider::Stripe, PaymentStatus::Completed)),
        event_type: event_type.to_string(),
    }
}

/// In-process payment service that records what it is asked.
#[derive(Clone, Default)]
pub struct MockPaymentService {
    pub payments: Vec<Payment>,
    pub events: Vec<PaymentEvent>,
    /// Sent after `events` instead of ending the stream.
    pub stream_error: Option<(Code, String)>,
    /// Keeps the stream open after `events` until the client goes away.
    pub hold_stream_open: bool,
    pub list_requests: Arc<Mutex<Vec<ListPaymentsRequest>>>,
    pub stream_requests: Arc<Mutex<Vec<ListPaymentsRequest>>>,
}

#[tonic::async_trait]
impl PaymentService for MockPaymentService {
    async fn get_payment(
        &self,
        request: Request<GetPaymentRequest>,
    ) -> Result<Response<Payment>, Status> {
        let payment_id = request.into_inner().payment_id;
        if payment_id.is_empty() {
            return Err(Status::invalid_argument("payment_id is required"));
        }
        self.payments
            .iter()
            .find(|p| p.id == payment_id)
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found(format!("payment not found: {payment_id}")))
    }

    async fn list_payments(
        &self,
        request: Request<ListPaymentsRequest>,
    ) -> Result<Response<PaymentList>, Status> {
        let request = request.into_inner();
        self.list_requests.lock().unwrap().push(request.clone());

        let limit = match request.limit {
            l if l <= 0 || l > 100 => 10,
            l => l as usize,
        };
        let payments = self
            .payments
            .iter()
            .filter(|p| request.provider == 0 || p.provider == request.provider)
            .filter(|p| request.status == 0 || p.status == request.status)
            .take(limit)
            .cloned()
            .collect::<Vec<_>>();
        Ok(Response::new(PaymentList {
            total_count: payments.len() as i32,
            payments,
            next_cursor: String::new(),
        }))
    }

    type StreamPaymentsStream = ReceiverStream<Result<PaymentEvent, Status>>;

    async fn stream_payments(
        &self,
        request: Request<ListPaymentsRequest>,
    ) -> Result<Response<Self::StreamPaymentsStream>, Status> {
        self.stream_requests
            .lock()
            .unwrap()
            .push(request.into_inner());

        let (tx, rx) = mpsc::channel(16);
        let events = self.events.clone();
        let stream_error = self.stream_error.clone();
        let hold_stream_open = self.hold_stream_open;
        tokio::spawn(async move {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            if let Some((code, message)) = stream_error {
                // the encoder drops buffered messages when the next item is an error
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = tx.send(Err(Status::new(code, message))).await;
            } else if hold_stream_open {
                tx.closed().await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Serves `service` on an ephemeral local port.
pub async fn spawn_mock_server(service: MockPaymentService) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        Server::builder()
            .add_service(PaymentServiceServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

/// Connector whose transport never becomes ready.
pub fn never_ready(_endpoint: Endpoint) -> ConnectFuture {
    Box::pin(std::future::pending::<Result<Channel, tonic::transport::Error>>())
}

/// A local address with nothing listening on it.
pub async fn unused_local_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
