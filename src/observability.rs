use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("parley.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("parley.client.request_errors");
pub(crate) static CLIENT_AUTH_FAILURES: Counter = Counter::new("parley.client.auth_failures");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("parley.client.request_duration_seconds");

pub(crate) static STREAM_OPENED: Counter = Counter::new("parley.stream.opened");
pub(crate) static STREAM_TOKENS: Counter = Counter::new("parley.stream.tokens");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("parley.stream.errors");
pub(crate) static STREAM_CANCELLED: Counter = Counter::new("parley.stream.cancelled");
pub(crate) static STREAM_BYTES: Counter = Counter::new("parley.stream.bytes");
pub(crate) static STREAM_DISCARDED_FRAMES: Counter =
    Counter::new("parley.stream.discarded_frames");

pub(crate) static RECONCILE_CREATES: Counter = Counter::new("parley.reconcile.creates");
pub(crate) static RECONCILE_PATCHES: Counter = Counter::new("parley.reconcile.patches");
pub(crate) static RECONCILE_PATCH_FALLBACKS: Counter =
    Counter::new("parley.reconcile.patch_fallbacks");

pub(crate) static QUOTA_REJECTIONS: Counter = Counter::new("parley.quota.rejections");

pub(crate) static STATE_SWITCH_FETCH_FAILURES: Counter =
    Counter::new("parley.state.switch_fetch_failures");
pub(crate) static STATE_REMOTE_DELETE_FAILURES: Counter =
    Counter::new("parley.state.remote_delete_failures");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_AUTH_FAILURES);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_OPENED);
    collector.register_counter(&STREAM_TOKENS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_CANCELLED);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_DISCARDED_FRAMES);

    collector.register_counter(&RECONCILE_CREATES);
    collector.register_counter(&RECONCILE_PATCHES);
    collector.register_counter(&RECONCILE_PATCH_FALLBACKS);

    collector.register_counter(&QUOTA_REJECTIONS);

    collector.register_counter(&STATE_SWITCH_FETCH_FAILURES);
    collector.register_counter(&STATE_REMOTE_DELETE_FAILURES);
}
