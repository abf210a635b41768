#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{product, CartModel, ProductModel},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        payments::{
            signature::signature_header, CreatePaymentIntentRequest, PaymentIntent,
            PaymentProcessor, SIGNATURE_HEADER,
        },
        AddToCartInput,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const SESSION_COOKIE: &str = "sessionCartId";

/// Payment processor double that records every request and issues
/// deterministic intents (`pi_test_1`, `pi_test_2`, ...).
#[derive(Default)]
pub struct RecordingProcessor {
    requests: Mutex<Vec<CreatePaymentIntentRequest>>,
    failure: Mutex<Option<String>>,
}

impl RecordingProcessor {
    pub fn requests(&self) -> Vec<CreatePaymentIntentRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Makes every following call fail with the processor's message.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl PaymentProcessor for RecordingProcessor {
    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(ServiceError::UpstreamPayment(message));
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let id = format!("pi_test_{}", requests.len());
        Ok(PaymentIntent {
            client_secret: format!("{}_secret_abc", id),
            id,
            amount: request.amount_minor,
            currency: request.currency,
            status: "requires_payment_method".to_string(),
        })
    }
}

/// Helper harness for spinning up the full router over an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub processor: Arc<RecordingProcessor>,
    _event_task: tokio::task::JoinHandle<usize>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        // Every connection to sqlite::memory: is its own database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_with_config(&DbConfig::from(&cfg))
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let processor = Arc::new(RecordingProcessor::default());
        let services =
            AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, processor.clone());

        let state = Arc::new(AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            services,
        });
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            processor,
            _event_task: event_task,
        }
    }

    /// Sends a JSON request, carrying the cart cookie when a session is given.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        session: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }

    /// Sends a raw body with the given content type.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        content_type: &str,
        body: &'static str,
        session: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session));
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).expect("build request"))
            .await
            .expect("router error during raw request")
    }

    /// Posts a webhook body with an optional raw signature header.
    pub async fn post_webhook_raw(&self, payload: Vec<u8>, signature: Option<String>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/stripe")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(payload)).expect("build request"))
            .await
            .expect("router error during webhook request")
    }

    /// Posts a webhook event signed with the test secret.
    pub async fn post_webhook(&self, event: &Value) -> Response {
        let payload = serde_json::to_vec(event).expect("serialize event");
        let signature = signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), &payload)
            .expect("sign payload");
        self.post_webhook_raw(payload, Some(signature)).await
    }

    pub async fn seed_product(&self, slug: &str, price_cents: i64, stock: i32) -> ProductModel {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Macrame {}", slug.replace('-', " "))),
            slug: Set(slug.to_string()),
            image: Set(format!("/images/{}.jpg", slug)),
            price_cents: Set(price_cents),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Puts `quantity` of the product into the session's cart.
    pub async fn fill_cart(&self, session: &str, product: &ProductModel, quantity: i32) -> CartModel {
        self.state
            .services
            .cart
            .add_item(
                session,
                AddToCartInput {
                    product_id: product.id,
                    variant_id: None,
                    quantity,
                },
            )
            .await
            .expect("add item to cart")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Session token set by the response, if any.
pub fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

pub fn guest_details() -> Value {
    json!({
        "fullName": "Ana Sousa",
        "email": "Ana@Example.com",
        "phone": "+351 912 345 678",
        "streetAddress": "12 Loom Street",
        "city": "Lisbon",
        "postalCode": "1100-001",
        "country": "Portugal"
    })
}

/// A `charge.succeeded` event carrying the given metadata.
pub fn charge_succeeded(
    event_id: &str,
    payment_intent: &str,
    amount: i64,
    metadata: BTreeMap<String, String>,
) -> Value {
    json!({
        "id": event_id,
        "type": "charge.succeeded",
        "data": {
            "object": {
                "id": format!("ch_{}", event_id),
                "amount": amount,
                "payment_intent": payment_intent,
                "billing_details": { "email": "ana@example.com" },
                "metadata": metadata
            }
        }
    })
}
