use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures::TryStreamExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::multipart::{FormData, Part};
use warp::reply::Response;
use warp::{Buf, Filter, Rejection, Reply};

use crate::error::{ShelfError, StorageError, SERVER_ERROR};
use crate::{Body, ShelfDb};

// 64KB cap on request bodies
const MAX_BODY: u64 = 64 * 1024;

const MALFORMED_BODY: &str = "Malformed request body.";

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Leading path segment for every API route, e.g. `api` for `/api/cards`.
    pub api_prefix: Option<String>,
    /// Directory served for paths the API does not claim.
    pub static_dir: Option<PathBuf>,
}

pub struct ShelfServer {
    db: Arc<ShelfDb>,
    options: ServerOptions,
}

impl ShelfServer {
    pub fn new(db: Arc<ShelfDb>, options: ServerOptions) -> Self {
        Self { db, options }
    }

    /// Serve until Ctrl-C.
    pub async fn run(&self, addr: SocketAddr) -> Result<(), warp::Error> {
        let routes = routes(self.db.clone(), &self.options);
        let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })?;
        info!(%bound, "listening");
        server.await;
        Ok(())
    }
}

/// Path of a collection or view the catalog does not know.
#[derive(Debug)]
struct UnknownResource;

impl warp::reject::Reject for UnknownResource {}

/// The full HTTP surface, including error recovery and request tracing.
pub fn routes(
    db: Arc<ShelfDb>,
    options: &ServerOptions,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
    let prefix: BoxedFilter<()> = match options.api_prefix.as_deref().map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => warp::path(p.to_string()).boxed(),
        _ => warp::any().boxed(),
    };

    let list = prefix
        .clone()
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_db(db.clone()))
        .and_then(handle_list);

    let get_one = prefix
        .clone()
        .and(warp::path!(String / String))
        .and(warp::get())
        .and(with_db(db.clone()))
        .and_then(handle_get);

    let create = prefix
        .clone()
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::post())
        .and(body())
        .and(with_db(db.clone()))
        .and_then(handle_create);

    let update = prefix
        .clone()
        .and(warp::path!(String / String))
        .and(warp::put())
        .and(body())
        .and(with_db(db.clone()))
        .and_then(handle_update);

    let delete = prefix
        .and(warp::path!(String / String))
        .and(warp::delete())
        .and(with_db(db))
        .and_then(handle_delete);

    let api = list.or(get_one).unify().or(create).unify().or(update).unify().or(delete).unify().boxed();

    let fallback: BoxedFilter<(Response,)> = match &options.static_dir {
        Some(dir) => warp::get().and(warp::fs::dir(dir.clone())).map(|f: warp::fs::File| f.into_response()).boxed(),
        None => warp::any()
            .and_then(|| async { Err::<Response, Rejection>(warp::reject::not_found()) })
            .boxed(),
    };

    api.or(fallback)
        .unify()
        .recover(handle_rejection)
        .unify()
        .with(warp::log::custom(|info| {
            info!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                elapsed_ms = info.elapsed().as_millis() as u64,
                "request handled"
            );
        }))
        .with(warp::trace(|info| {
            tracing::info_span!("request", id = %Uuid::new_v4(), method = %info.method(), path = %info.path())
        }))
}

fn with_db(db: Arc<ShelfDb>) -> impl Filter<Extract = (Arc<ShelfDb>,), Error = Infallible> + Clone {
    warp::any().map(move || db.clone())
}

// --- BODY DECODING ---

/// JSON, URL-encoded or multipart body. `None` means the body could not be decoded.
fn body() -> impl Filter<Extract = (Option<Body>,), Error = Rejection> + Clone {
    let multipart = warp::header::optional::<String>("content-type")
        .and_then(|ct: Option<String>| async move {
            let ct = ct.unwrap_or_default().to_ascii_lowercase();
            if ct.starts_with("multipart/form-data") {
                Ok(())
            } else {
                Err(warp::reject::not_found())
            }
        })
        .untuple_one()
        .and(warp::multipart::form().max_length(MAX_BODY))
        .and_then(read_multipart);

    let plain = warp::body::content_length_limit(MAX_BODY)
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::bytes())
        .map(decode_body);

    multipart.or(plain).unify()
}

async fn read_multipart(form: FormData) -> Result<Option<Body>, Rejection> {
    let parts: Vec<Part> = match form.try_collect().await {
        Ok(parts) => parts,
        Err(e) => {
            debug!(error = %e, "bad multipart body");
            return Ok(None);
        }
    };

    let mut pairs = Vec::with_capacity(parts.len());
    for mut part in parts {
        let name = part.name().to_string();
        let mut value = Vec::new();
        while let Some(chunk) = part.data().await {
            match chunk {
                Ok(mut buf) => {
                    while buf.has_remaining() {
                        let chunk = buf.chunk();
                        let n = chunk.len();
                        value.extend_from_slice(chunk);
                        buf.advance(n);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "bad multipart part");
                    return Ok(None);
                }
            }
        }
        pairs.push((name, String::from_utf8_lossy(&value).into_owned()));
    }
    Ok(Some(Body::Form(pairs)))
}

pub fn decode_body(content_type: Option<String>, bytes: Bytes) -> Option<Body> {
    let ct = content_type.unwrap_or_default().to_ascii_lowercase();

    if ct.starts_with("application/x-www-form-urlencoded") {
        let pairs = url::form_urlencoded::parse(&bytes).into_owned().collect();
        return Some(Body::Form(pairs));
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Some(Body::Json(Default::default()));
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(Body::Json(map)),
        _ => None,
    }
}

// --- HANDLERS ---

/// Run a store operation on the blocking pool.
async fn blocking<T, F>(db: Arc<ShelfDb>, op: F) -> Result<T, ShelfError>
where
    F: FnOnce(&ShelfDb) -> Result<T, ShelfError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&*db))
        .await
        .map_err(|e| ShelfError::Storage(StorageError::Task(e.to_string())))?
}

fn text(status: StatusCode, message: String) -> Response {
    warp::reply::with_status(message, status).into_response()
}

fn error_reply(err: ShelfError) -> Result<Response, Rejection> {
    match &err {
        ShelfError::UnknownCollection(name) => {
            debug!(%name, "unknown collection");
            return Err(warp::reject::custom(UnknownResource));
        }
        ShelfError::Storage(cause) => error!(error = %cause, "storage failure"),
        other => debug!(error = %other, "request rejected"),
    }
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok(text(status, err.to_string()))
}

async fn handle_list(name: String, query: HashMap<String, String>, db: Arc<ShelfDb>) -> Result<Response, Rejection> {
    let res = blocking(db, move |db| {
        if db.catalog().collection(&name).is_none() && db.catalog().view(&name).is_some() {
            db.view(&name)
        } else {
            db.list(&name, &query)
        }
    })
    .await;

    match res {
        Ok(records) => Ok(warp::reply::json(&records).into_response()),
        Err(e) => error_reply(e),
    }
}

async fn handle_get(name: String, id: String, db: Arc<ShelfDb>) -> Result<Response, Rejection> {
    match blocking(db, move |db| db.get_by_id(&name, &id)).await {
        Ok(record) => Ok(warp::reply::json(&record).into_response()),
        Err(e) => error_reply(e),
    }
}

async fn handle_create(name: String, body: Option<Body>, db: Arc<ShelfDb>) -> Result<Response, Rejection> {
    let Some(body) = body else {
        return Ok(text(StatusCode::BAD_REQUEST, MALFORMED_BODY.to_string()));
    };
    match blocking(db, move |db| db.create(&name, body)).await {
        Ok(ack) => Ok(text(StatusCode::CREATED, ack.message)),
        Err(e) => error_reply(e),
    }
}

async fn handle_update(name: String, id: String, body: Option<Body>, db: Arc<ShelfDb>) -> Result<Response, Rejection> {
    let Some(body) = body else {
        return Ok(text(StatusCode::BAD_REQUEST, MALFORMED_BODY.to_string()));
    };
    match blocking(db, move |db| db.update(&name, &id, body)).await {
        Ok(ack) => Ok(text(StatusCode::OK, ack.message)),
        Err(e) => error_reply(e),
    }
}

async fn handle_delete(name: String, id: String, db: Arc<ShelfDb>) -> Result<Response, Rejection> {
    match blocking(db, move |db| db.delete(&name, &id)).await {
        Ok(ack) => Ok(text(StatusCode::OK, ack.message)),
        Err(e) => error_reply(e),
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.find::<UnknownResource>().is_some() || err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found.")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large.")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Malformed query string.")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.")
    } else {
        warn!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR)
    };
    Ok(text(status, message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_objects_only() {
        let body = decode_body(Some("application/json".into()), Bytes::from_static(br#"{"name":"x"}"#));
        assert_eq!(body, Some(Body::Json(json!({"name": "x"}).as_object().cloned().unwrap())));

        assert_eq!(decode_body(None, Bytes::from_static(b"[1,2]")), None);
        assert_eq!(decode_body(None, Bytes::from_static(b"{oops")), None);
        assert_eq!(decode_body(None, Bytes::from_static(b"  ")), Some(Body::Json(Default::default())));
    }

    #[test]
    fn decodes_urlencoded_pairs() {
        let body = decode_body(
            Some("application/x-www-form-urlencoded; charset=UTF-8".into()),
            Bytes::from_static(b"name=Blue+Eyes&level=8"),
        );
        assert_eq!(
            body,
            Some(Body::Form(vec![("name".into(), "Blue Eyes".into()), ("level".into(), "8".into())]))
        );
    }
}
