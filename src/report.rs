//! Fire-and-forget error reporting.
//!
//! Occurrences are always logged; when an access token is configured they
//! are additionally uploaded as Rollbar-shaped items. Upload failures only
//! warn.

use std::sync::Arc;

use log::{error, warn};
use serde::Serialize;

const ENDPOINT: &str = "https://api.rollbar.com/api/1/item/";

#[derive(Serialize)]
struct Item<'a> {
    access_token: &'a str,
    data: ItemData<'a>,
}

#[derive(Serialize)]
struct ItemData<'a> {
    environment: &'a str,
    level: &'a str,
    body: ItemBody<'a>,
}

#[derive(Serialize)]
struct ItemBody<'a> {
    message: ItemMessage<'a>,
}

#[derive(Serialize)]
struct ItemMessage<'a> {
    body: &'a str,
}

#[derive(Clone)]
pub struct Reporter {
    inner: Option<Arc<Inner>>,
}

struct Inner {
    token: String,
    environment: String,
    client: reqwest::Client,
}

impl Reporter {
    pub fn new(client: reqwest::Client, token: Option<String>, environment: String) -> Self {
        let inner = token.filter(|token| !token.is_empty()).map(|token| {
            Arc::new(Inner {
                token,
                environment,
                client,
            })
        });
        Self { inner }
    }

    pub fn report(&self, context: &str, err: &crate::Error) {
        error!("{context}: {err}");
        let Some(inner) = &self.inner else {
            return;
        };
        let message = format!("{context}: {err}");
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let item = Item {
                access_token: &inner.token,
                data: ItemData {
                    environment: &inner.environment,
                    level: "error",
                    body: ItemBody {
                        message: ItemMessage { body: &message },
                    },
                },
            };
            if let Err(err) = inner.client.post(ENDPOINT).json(&item).send().await {
                warn!("error report upload failed: {err}");
            }
        });
    }
}
