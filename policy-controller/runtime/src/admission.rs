use crate::{
    core::ClusterStore,
    inject::Injector,
    k8s::{Pod, Resource},
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Mutating admission webhook that injects timesync sidecars into pods.
pub struct Admission<S> {
    injector: Arc<Injector<S>>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl<S> Clone for Admission<S> {
    fn clone(&self) -> Self {
        Self {
            injector: self.injector.clone(),
        }
    }
}

impl<S> tower::Service<Request<hyper::body::Incoming>> for Admission<S>
where
    S: ClusterStore + 'static,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = admission.review(review).await;
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl<S: ClusterStore> Admission<S> {
    pub fn new(injector: Injector<S>) -> Self {
        Self {
            injector: Arc::new(injector),
        }
    }

    pub(crate) async fn review(&self, review: Review) -> AdmissionResponse {
        match review.try_into() {
            Ok(req) => {
                debug!(?req);
                self.admit(req).await
            }
            Err(error) => {
                warn!(%error, "Invalid admission request");
                AdmissionResponse::invalid(error)
            }
        }
    }

    async fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        if !is_kind::<Pod>(&req) {
            return AdmissionResponse::invalid(format_args!(
                "not a pod: {}.{}.{}",
                req.kind.group, req.kind.version, req.kind.kind
            ));
        }

        let rsp = AdmissionResponse::from(&req);
        let original = match parse_pod(&req) {
            Ok(pod) => pod,
            Err(error) => {
                warn!(%error, "Failed to parse pod; admitting without a sidecar");
                return rsp;
            }
        };

        // Pods created through a controller often omit their namespace.
        let mut pod = original.clone();
        if pod.metadata.namespace.is_none() {
            pod.metadata.namespace = req.namespace.clone();
        }
        let mut mutated = self.injector.mutate_pod(pod).await;
        mutated.metadata.namespace = original.metadata.namespace.clone();

        let patch = match pod_patch(&original, &mutated) {
            Ok(Some(patch)) => patch,
            Ok(None) => return rsp,
            Err(error) => {
                warn!(%error, "Failed to generate pod patch; admitting without a sidecar");
                return rsp;
            }
        };
        debug!(?patch);
        match rsp.with_patch(patch) {
            Ok(rsp) => rsp,
            Err(error) => {
                warn!(%error, "Failed to serialize pod patch; admitting without a sidecar");
                AdmissionResponse::from(&req)
            }
        }
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn parse_pod(req: &AdmissionRequest) -> Result<Pod, serde_json::Error> {
    let obj = req.object.as_ref().ok_or_else(|| {
        <serde_json::Error as serde::de::Error>::custom("admission request missing 'object'")
    })?;
    serde_json::to_value(obj).and_then(serde_json::from_value)
}

/// Computes the JSON patch that transforms `original` into `mutated`, or
/// `None` when they are identical.
pub(crate) fn pod_patch(
    original: &Pod,
    mutated: &Pod,
) -> Result<Option<json_patch::Patch>, serde_json::Error> {
    let patch = json_patch::diff(
        &serde_json::to_value(original)?,
        &serde_json::to_value(mutated)?,
    );
    if patch.0.is_empty() {
        return Ok(None);
    }
    Ok(Some(patch))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
