use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{HttpBackend, SearchBackend};
use crate::config::{ConnectionContext, SearchConfig};
use crate::error::{GraylogMcpError, Result, TimeRangeRule};
use crate::fallback::FallbackExecutor;
use crate::fields::{FieldSelection, FieldSelector};
use crate::interval::IntervalResolver;
use crate::model::{
    AggregateFieldParams, EntityPage, EventList, EventListParams, EventSearchParams, FieldFilters, FieldTimeParams,
    HistogramParams, NormalizedResult, SearchMessagesParams, StreamScope, StreamSummary, SurroundingMessagesParams,
    TimeWindow,
};
use crate::normalize::ResultNormalizer;
use crate::payload::{
    AggregationPayloadBuilder, AggregationRequest, AlertFilter, EventSearchRequest, Metric, RequestKind, SortOrder,
};
use crate::query::QueryCompiler;
use crate::timerange::{absolute_window, parse_instant_text, TimeRangeResolver, MAX_RANGE_SECS};

pub const MAX_PAGE_SIZE: usize = 1_000;
pub const DEFAULT_SURROUNDING_LIMIT: usize = 50;
pub const DEFAULT_SERIES_LIMIT: usize = 10;
pub const FIELD_VALUES_DEFAULT_SECS: u64 = 3_600;
/// Window used to look a message up by id.
pub const MESSAGE_LOOKUP_SECS: u64 = 86_400;
pub const EVENT_PAGE_SIZE: u32 = 50;

/// Search engine: compiles caller parameters into payloads, runs them, normalizes the replies.
pub struct SearchEngine {
    backend: Arc<dyn SearchBackend>,
    settings: SearchConfig,
    default_streams: Vec<String>,
    time: TimeRangeResolver,
    query: QueryCompiler,
    fields: FieldSelector,
    intervals: IntervalResolver,
    payloads: AggregationPayloadBuilder,
    fallback: FallbackExecutor,
    normalizer: ResultNormalizer,
}

impl SearchEngine {
    pub fn new(backend: Arc<dyn SearchBackend>, settings: SearchConfig) -> Self {
        Self {
            backend,
            settings,
            default_streams: Vec::new(),
            time: TimeRangeResolver::new(),
            query: QueryCompiler::new(),
            fields: FieldSelector::new(),
            intervals: IntervalResolver::new(),
            payloads: AggregationPayloadBuilder::new(),
            fallback: FallbackExecutor::new(),
            normalizer: ResultNormalizer::new(),
        }
    }

    pub fn for_connection(ctx: &ConnectionContext) -> Result<Self> {
        let backend = HttpBackend::new(&ctx.connection, ctx.search.request_timeout_ms)?;
        Ok(Self::new(Arc::new(backend), ctx.search.clone())
            .with_default_stream(ctx.connection.default_stream.clone()))
    }

    /// Stream applied when a request does not scope itself.
    pub fn with_default_stream(mut self, stream: Option<String>) -> Self {
        self.default_streams = stream.into_iter().filter(|s| !s.trim().is_empty()).collect();
        self
    }

    pub async fn search_messages(&self, params: SearchMessagesParams) -> Result<NormalizedResult> {
        let window = self.time.resolve(&params.time)?;
        let page = params.page.unwrap_or(1);
        if page == 0 {
            return Err(GraylogMcpError::InvalidRequest("page must be >= 1".into()));
        }
        let page_size = match params.page_size {
            None | Some(0) => self.settings.default_page_size,
            Some(n) => n.min(MAX_PAGE_SIZE),
        };
        let fields = self.fields.resolve(params.fields.as_deref(), &self.settings.default_fields);
        let req = AggregationRequest {
            window,
            query: self.compile(params.query.as_deref(), &params.filters, params.exact_match),
            streams: self.streams(&params.streams),
            kind: RequestKind::MessageSearch {
                limit: page_size,
                offset: page_size.saturating_mul(page - 1),
                sort: Some(SortOrder::Desc),
            },
        };
        info!(query = %req.query, page, page_size, "searching messages");
        let raw = self.execute_single(&req).await?;
        let mut list = self.normalizer.messages(&raw, &fields);
        list.page = Some(page);
        list.page_size = Some(page_size);
        Ok(NormalizedResult::Messages(list))
    }

    /// Messages within `surroundingSeconds` of a target located by id or timestamp.
    pub async fn get_surrounding_messages(&self, params: SurroundingMessagesParams) -> Result<NormalizedResult> {
        let seconds = params
            .surrounding_seconds
            .unwrap_or(self.settings.default_surrounding_seconds);
        check_surrounding_seconds(seconds)?;

        let anchor = match (non_blank(&params.message_id), non_blank(&params.message_timestamp)) {
            (Some(id), _) => self.locate_message(id).await?,
            (None, Some(ts)) => parse_instant_text(ts)
                .ok_or_else(|| GraylogMcpError::invalid_time(ts, TimeRangeRule::Malformed))?,
            (None, None) => {
                return Err(GraylogMcpError::MissingRequiredParameter(
                    "messageId or messageTimestamp".into(),
                ))
            }
        };

        let window = surrounding_window(anchor, seconds)?;
        let limit = params.limit.filter(|n| *n > 0).unwrap_or(DEFAULT_SURROUNDING_LIMIT);
        let fields = self.fields.resolve(params.fields.as_deref(), &self.settings.default_fields);
        let req = AggregationRequest {
            window,
            query: self.compile(params.query.as_deref(), &params.filters, params.exact_match),
            streams: self.streams(&params.streams),
            kind: RequestKind::MessageSearch {
                limit: limit.min(MAX_PAGE_SIZE),
                offset: 0,
                sort: Some(SortOrder::Asc),
            },
        };
        let raw = self.execute_single(&req).await?;
        Ok(NormalizedResult::Messages(self.normalizer.messages(&raw, &fields)))
    }

    pub async fn aggregate_field(&self, params: AggregateFieldParams) -> Result<NormalizedResult> {
        self.field_values(params, None).await
    }

    /// Distinct values of a field with counts; one hour window unless told otherwise.
    pub async fn list_field_values(&self, mut params: AggregateFieldParams) -> Result<NormalizedResult> {
        params.metrics = vec![Metric::Count.to_string()];
        params.value_field = None;
        self.field_values(params, Some(FIELD_VALUES_DEFAULT_SECS)).await
    }

    pub async fn histogram(&self, params: HistogramParams) -> Result<NormalizedResult> {
        let window = self.time.resolve(&params.time)?;
        let interval = self.intervals.resolve(&window, &params.interval);
        let req = AggregationRequest {
            query: self.compile(params.query.as_deref(), &params.filters, params.exact_match),
            streams: self.streams(&params.streams),
            kind: RequestKind::Histogram { interval },
            window,
        };
        self.execute_chain(&req).await
    }

    pub async fn field_time_aggregation(&self, params: FieldTimeParams) -> Result<NormalizedResult> {
        let field = required(&params.field, "field")?;
        let window = self.time.resolve(&params.time)?;
        let interval = self.intervals.resolve(&window, &params.interval);
        let req = AggregationRequest {
            query: self.compile(params.query.as_deref(), &params.filters, params.exact_match),
            streams: self.streams(&params.streams),
            kind: RequestKind::FieldTimeAggregation {
                field: field.to_string(),
                interval,
                limit: params.limit.filter(|n| *n > 0).unwrap_or(DEFAULT_SERIES_LIMIT),
            },
            window,
        };
        self.execute_chain(&req).await
    }

    pub async fn list_streams(&self) -> Result<Vec<StreamSummary>> {
        let raw = self.backend.list_streams().await?;
        let streams = raw.get("streams").cloned().unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(streams)?)
    }

    /// Events and alerts raised by event definitions, newest first.
    pub async fn search_events(&self, params: EventSearchParams) -> Result<EventList> {
        let window = self.time.resolve(&params.time)?;
        let page = first_page(params.page)?;
        let per_page = match params.per_page {
            None | Some(0) => EVENT_PAGE_SIZE,
            Some(n) => n.min(MAX_PAGE_SIZE as u32),
        };
        let alerts = match non_blank(&params.alerts) {
            Some(a) => a.parse::<AlertFilter>()?,
            None => AlertFilter::default(),
        };
        let mut definitions: Vec<String> = Vec::new();
        for id in params.event_definitions.iter().map(|d| d.trim()).filter(|d| !d.is_empty()) {
            if !definitions.iter().any(|d| d == id) {
                definitions.push(id.to_string());
            }
        }
        let req = EventSearchRequest {
            window,
            query: non_blank(&params.query).unwrap_or_default().to_string(),
            alerts,
            definitions,
            page,
            per_page,
        };
        info!(query = %req.query, alerts = req.alerts.as_str(), page, per_page, "searching events");
        let raw = self.backend.search_events(&self.payloads.event_search(&req)).await?;
        let mut list = self.normalizer.events(&raw);
        list.page = Some(page);
        list.per_page = Some(per_page);
        Ok(list)
    }

    pub async fn list_event_definitions(&self, params: EventListParams) -> Result<EntityPage> {
        first_page(params.page)?;
        let raw = self.backend.list_event_definitions(&params).await?;
        Ok(self.normalizer.entities(&raw, "event_definitions"))
    }

    /// Notifications take no query; only paging is forwarded.
    pub async fn list_event_notifications(&self, mut params: EventListParams) -> Result<EntityPage> {
        first_page(params.page)?;
        params.query = None;
        let raw = self.backend.list_event_notifications(&params).await?;
        Ok(self.normalizer.entities(&raw, "notifications"))
    }

    async fn field_values(&self, params: AggregateFieldParams, default_secs: Option<u64>) -> Result<NormalizedResult> {
        let field = required(&params.field, "field")?;
        let window = match default_secs {
            Some(secs) => self.time.resolve_or(&params.time, secs)?,
            None => self.time.resolve(&params.time)?,
        };
        let metrics = if params.metrics.is_empty() {
            vec![Metric::Count]
        } else {
            params
                .metrics
                .iter()
                .map(|m| m.parse::<Metric>())
                .collect::<Result<Vec<_>>>()?
        };
        let req = AggregationRequest {
            window,
            query: self.compile(params.query.as_deref(), &params.filters, params.exact_match),
            streams: self.streams(&params.streams),
            kind: RequestKind::FieldAggregation {
                field: field.to_string(),
                limit: params
                    .limit
                    .filter(|n| *n > 0)
                    .unwrap_or(self.settings.default_field_limit),
                metrics,
                value_field: params.value_field.clone(),
            },
        };
        let raw = self.execute_single(&req).await?;
        Ok(self.normalizer.normalize(&raw, req.kind.kind(), &FieldSelection::All))
    }

    async fn locate_message(&self, id: &str) -> Result<DateTime<Utc>> {
        let req = AggregationRequest {
            window: TimeWindow::Relative {
                seconds: MESSAGE_LOOKUP_SECS,
            },
            query: format!("gl2_message_id:{id}"),
            streams: Vec::new(),
            kind: RequestKind::MessageSearch {
                limit: 1,
                offset: 0,
                sort: None,
            },
        };
        let raw = self.execute_single(&req).await?;
        let found = self.normalizer.messages(&raw, &FieldSelection::All);
        let message = found
            .messages
            .first()
            .ok_or_else(|| GraylogMcpError::MessageNotFound(id.to_string()))?;
        message
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_instant_text)
            .ok_or_else(|| GraylogMcpError::InvalidRequest(format!("message {id} has no parseable timestamp")))
    }

    /// Builds the payload and sends it once; backend errors surface as-is.
    async fn execute_single(&self, req: &AggregationRequest) -> Result<Value> {
        let variant = self
            .payloads
            .variants(req)?
            .into_iter()
            .next()
            .ok_or_else(|| GraylogMcpError::InvalidRequest("no payload for request".into()))?;
        self.backend.execute(&variant.payload).await
    }

    async fn execute_chain(&self, req: &AggregationRequest) -> Result<NormalizedResult> {
        let variants = self.payloads.variants(req)?;
        let outcome = self.fallback.run(variants, self.backend.as_ref()).await?;
        debug!(variant = outcome.label, failed = outcome.failures.len(), "fallback chain settled");
        Ok(self
            .normalizer
            .normalize(&outcome.raw, req.kind.kind(), &FieldSelection::All)
            .with_variant(outcome.label))
    }

    fn compile(&self, free_text: Option<&str>, filters: &FieldFilters, exact_match: bool) -> String {
        self.query.compile(free_text, filters, exact_match)
    }

    fn streams(&self, scope: &StreamScope) -> Vec<String> {
        let ids = scope.ids();
        if ids.is_empty() {
            self.default_streams.clone()
        } else {
            ids
        }
    }
}

/// Each side of the window may span at most half the maximum range.
fn check_surrounding_seconds(seconds: f64) -> Result<()> {
    let rule = if seconds.is_nan() {
        TimeRangeRule::Malformed
    } else if seconds < 0.0 {
        TimeRangeRule::Negative
    } else if seconds == 0.0 {
        TimeRangeRule::Zero
    } else if seconds > (MAX_RANGE_SECS / 2) as f64 {
        TimeRangeRule::TooLong
    } else {
        return Ok(());
    };
    Err(GraylogMcpError::invalid_time(format!("surroundingSeconds={seconds}"), rule))
}

fn surrounding_window(anchor: DateTime<Utc>, seconds: f64) -> Result<TimeWindow> {
    let bounds = Duration::try_milliseconds((seconds * 1000.0) as i64).and_then(|half| {
        Some((anchor.checked_sub_signed(half)?, anchor.checked_add_signed(half)?))
    });
    let Some((from, to)) = bounds else {
        return Err(GraylogMcpError::invalid_time(
            format!("{} ± {seconds}s", anchor.to_rfc3339()),
            TimeRangeRule::TooLong,
        ));
    };
    absolute_window(from, to)
}

fn first_page(page: Option<u32>) -> Result<u32> {
    match page.unwrap_or(1) {
        0 => Err(GraylogMcpError::InvalidRequest("page must be >= 1".into())),
        p => Ok(p),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    non_blank(value).ok_or_else(|| GraylogMcpError::MissingRequiredParameter(name.to_string()))
}
