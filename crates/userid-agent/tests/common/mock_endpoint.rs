//! Simple mock User-ID API endpoint for exercising connectors end to end.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const SUCCESS_BODY: &str = r#"<response status="success"><result>no</result></response>"#;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    /// Value of one form field in the request body, percent-decoded.
    pub fn form_value(&self, name: &str) -> Option<String> {
        let body = String::from_utf8_lossy(&self.body).into_owned();
        body.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name)
                .then(|| urlencoding::decode(value).ok().map(|v| v.into_owned()))
                .flatten()
        })
    }
}

#[derive(Clone)]
pub struct MockEndpoint {
    pub addr: SocketAddr,
    received_requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    response: Arc<Mutex<(u16, String)>>,
}

impl MockEndpoint {
    /// Start a mock endpoint on a random port, answering success to
    /// everything until told otherwise.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock endpoint");
        let addr = listener.local_addr().expect("failed to get local addr");

        let received_requests = Arc::new(Mutex::new(Vec::new()));
        let response = Arc::new(Mutex::new((200u16, SUCCESS_BODY.to_string())));
        let requests_clone = received_requests.clone();
        let response_clone = response.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let requests = requests_clone.clone();
                let response = response_clone.clone();

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let requests = requests.clone();
                        let response = response.clone();
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let body = req
                                .into_body()
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes().to_vec())
                                .unwrap_or_default();

                            requests.lock().unwrap().push(ReceivedRequest {
                                method,
                                path,
                                body,
                            });

                            let (status, body) = response.lock().unwrap().clone();
                            Ok::<_, hyper::http::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from(body)))
                                    .unwrap(),
                            )
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockEndpoint {
            addr,
            received_requests,
            response,
        }
    }

    /// Base URL of the mock endpoint.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Changes the canned response for subsequent requests.
    pub fn set_response(&self, status: u16, body: &str) {
        *self.response.lock().unwrap() = (status, body.to_string());
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.received_requests.lock().unwrap().clone()
    }

    /// Received update requests only, probes filtered out.
    pub fn update_requests(&self) -> Vec<ReceivedRequest> {
        self.requests()
            .into_iter()
            .filter(|req| req.form_value("type").as_deref() == Some("user-id"))
            .collect()
    }

    #[allow(dead_code)]
    pub fn clear_requests(&self) {
        self.received_requests.lock().unwrap().clear();
    }
}
