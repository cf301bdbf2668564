#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use gateway_client::{
    ClientConfig, ResilientClient, Transport, TransportError, TransportRequest, TransportResponse,
};
use http::StatusCode;

type Responder =
    dyn Fn(usize, &TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

/// Transporte cujas respostas vêm de uma closure; conta cada chamada
#[derive(Clone)]
pub struct FakeTransport {
    responder: Arc<Mutex<Arc<Responder>>>,
    calls: Arc<AtomicUsize>,
    delay: Duration,
    seen: Arc<Mutex<Vec<TransportRequest>>>,
}

impl FakeTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(usize, &TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Arc::new(Mutex::new(Arc::new(responder))),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Toda chamada responde com `status` e `body`
    pub fn status(status: u16, body: &'static str) -> Self {
        Self::new(move |_, _| {
            Ok(TransportResponse::new(
                StatusCode::from_u16(status).unwrap(),
                body,
            ))
        })
    }

    pub fn unreachable() -> Self {
        Self::new(|_, _| Err(TransportError::NoResponse("connection refused".into())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Troca o comportamento no meio do teste (ex.: o backend se recupera)
    pub fn set<F>(&self, responder: F)
    where
        F: Fn(usize, &TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        *self.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let responder = Arc::clone(&*self.responder.lock().unwrap());
        responder(n, &request)
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        base_url: "http://gateway.test".into(),
        ..ClientConfig::default()
    }
}

pub fn client(transport: &FakeTransport) -> ResilientClient<FakeTransport> {
    ResilientClient::new(transport.clone(), config())
}
