//! Per-call driver task.
//!
//! One spawned task per call owns the accumulator and the connection. It
//! resolves the key, transforms history for the target, opens the request
//! under the retry policy, lets the adapter translate the body and finally
//! routes exactly one terminal event (`done`, or `error` with `aborted`
//! taking priority once the caller's signal has fired).

use std::sync::Arc;

use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::errors::{ProviderError, TransformError};
use crate::event_stream::AssistantMessageEventStream;
use crate::model::{Model, ProviderId};
use crate::options::StreamOptions;
use crate::provider::{ProviderAdapter, StreamCall};
use crate::retry::{NormalizedError, execute_with_retry};
use crate::transform::{TransformTarget, transform_messages};
use crate::types::{Context, DoneReason, ErrorReason};

#[derive(Debug, thiserror::Error)]
enum CallError {
    #[error("No API key for provider: {0}")]
    MissingApiKey(ProviderId),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("{}", .0.message())]
    Provider(#[from] ProviderError),
    #[error("{}", .0.message)]
    Send(#[from] NormalizedError),
}

/// Starts the call task and returns its event stream.
pub(crate) fn spawn_call(
    adapter: Arc<dyn ProviderAdapter>,
    model: Model,
    context: Context,
    options: StreamOptions,
) -> AssistantMessageEventStream {
    let events = AssistantMessageEventStream::assistant();
    let call_id = uuid::Uuid::new_v4();
    let span = info_span!(
        "llm_call",
        call_id = %call_id,
        api = %model.api,
        provider = %model.provider,
        model = %model.id,
    );
    tokio::spawn(run_call(adapter, model, context, options, events.clone()).instrument(span));
    events
}

async fn run_call(
    adapter: Arc<dyn ProviderAdapter>,
    model: Model,
    context: Context,
    options: StreamOptions,
    events: AssistantMessageEventStream,
) {
    info!(messages = context.messages.len(), tools = context.tools.len(), "call started");
    let mut call = StreamCall::new(&model, events);
    let outcome = drive(adapter.as_ref(), &model, &context, &options, &mut call).await;
    finish(&mut call, outcome, &options);
    adapter.cleanup(&model).await;
}

async fn drive(
    adapter: &dyn ProviderAdapter,
    model: &Model,
    context: &Context,
    options: &StreamOptions,
    call: &mut StreamCall,
) -> Result<(), CallError> {
    let api_key = adapter
        .resolve_api_key(model, options)
        .ok_or_else(|| CallError::MissingApiKey(model.provider.clone()))?;

    let normalize = |id: &str| adapter.normalize_tool_call_id(id, model);
    let target = TransformTarget::for_model(model).with_tool_call_id_normalizer(&normalize);
    let mut transformed = context.clone();
    transformed.messages = transform_messages(&context.messages, &target)?;

    adapter.initialize(model, options).await?;
    let request = adapter.build_request(model, &transformed, options, &api_key)?;
    if let Some(hook) = &options.on_payload {
        hook.call(&request.body);
    }

    let policy = options.effective_retry_policy();
    let request = &request;
    let body = execute_with_retry(&policy, options.signal.as_ref(), move |attempt| {
        debug!(attempt, url = %request.url, "opening stream");
        adapter.send_request(request, options)
    })
    .await?;

    call.emit_start();
    match &options.signal {
        Some(signal) => {
            tokio::select! {
                biased;
                _ = signal.aborted() => Err(ProviderError::aborted(model.provider.clone()).into()),
                result = adapter.execute_stream(body, options, call) => result.map_err(CallError::from),
            }
        }
        None => adapter
            .execute_stream(body, options, call)
            .await
            .map_err(CallError::from),
    }
}

fn finish(call: &mut StreamCall, outcome: Result<(), CallError>, options: &StreamOptions) {
    let outcome = outcome.and_then(|()| call.end_open_blocks().map_err(CallError::from));
    let stop_reason = call.state().stop_reason();
    let failure = match outcome {
        Ok(()) if options.is_aborted() => "Request was aborted".to_string(),
        Ok(()) => match DoneReason::try_from(stop_reason) {
            Ok(reason) => {
                call.state_mut().complete();
                let message = call.state().to_message();
                info!(
                    ?reason,
                    input = message.usage.input,
                    output = message.usage.output,
                    cost = message.usage.cost.total,
                    "call finished"
                );
                call.events().push_done(reason, message);
                return;
            }
            Err(reason) => format!("stream ended with stop reason {reason:?}"),
        },
        Err(err) => err.to_string(),
    };

    call.discard_bookkeeping();
    let reason = if options.is_aborted() {
        call.state_mut().abort(failure);
        ErrorReason::Aborted
    } else {
        call.state_mut().error(failure);
        ErrorReason::Error
    };
    let message = call.state().to_message();
    warn!(
        ?reason,
        error = message.error_message.as_deref().unwrap_or_default(),
        "call failed"
    );
    call.events().push_error(reason, message);
}
