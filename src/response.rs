//! Standard response envelope helpers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MSG_CREATED: &str = "Created successfully";
pub const MSG_FETCHED: &str = "Data fetched successfully";
pub const MSG_UPDATED: &str = "Updated successfully";
pub const MSG_DELETED: &str = "Deleted successfully";

/// Page bookkeeping of a counted list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginator {
    pub item_count: u64,
    pub per_page: u32,
    pub page_count: u64,
    pub current_page: u32,
}

impl Paginator {
    pub fn new(item_count: u64, per_page: u32, current_page: u32) -> Self {
        let per_page = per_page.max(1);
        Paginator {
            item_count,
            per_page,
            page_count: item_count.div_ceil(per_page as u64),
            current_page: current_page.max(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paginator: Option<Paginator>,
}

impl Envelope {
    pub fn data(data: impl Into<Value>) -> Self {
        Envelope {
            data: data.into(),
            paginator: None,
        }
    }
}

/// Handler result: status plus `{success, message, data, paginator?}`.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub message: &'static str,
    pub envelope: Envelope,
}

#[derive(Serialize)]
struct ReplyBody<'a> {
    success: bool,
    message: &'a str,
    #[serde(flatten)]
    envelope: &'a Envelope,
}

impl Reply {
    pub fn created(data: impl Into<Value>) -> Self {
        Reply {
            status: StatusCode::CREATED,
            message: MSG_CREATED,
            envelope: Envelope::data(data),
        }
    }

    pub fn fetched(envelope: Envelope) -> Self {
        Reply {
            status: StatusCode::OK,
            message: MSG_FETCHED,
            envelope,
        }
    }

    pub fn updated(data: impl Into<Value>) -> Self {
        Reply {
            status: StatusCode::OK,
            message: MSG_UPDATED,
            envelope: Envelope::data(data),
        }
    }

    pub fn deleted(data: impl Into<Value>) -> Self {
        Reply {
            status: StatusCode::OK,
            message: MSG_DELETED,
            envelope: Envelope::data(data),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(ReplyBody {
            success: self.status.is_success(),
            message: self.message,
            envelope: &self.envelope,
        })
        .unwrap_or(Value::Null)
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.to_json())).into_response()
    }
}
