//! Pagination Cursor Loop
//!
//! A scope's list operation as a lazy stream of pages. The stream ends when
//! the API returns no cursor, repeats the previous cursor, the stop token is
//! cancelled, or a call fails (the error is the last element).

use super::qualifier::ApiFilter;
use super::sink::RowLimit;
use super::ExecutionContext;
use crate::error::ApiError;
use crate::provider::{ListRequest, Page, Provider};
use crate::resource::ListDef;
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Page size to request: the API maximum, capped by the remaining row budget
/// and raised to the API minimum. `None` when the API takes no page size.
pub fn page_size(list: &ListDef, remaining: Option<u64>) -> Option<u32> {
    list.page_size_param.as_ref()?;

    let remaining = remaining.map(|r| u32::try_from(r).unwrap_or(u32::MAX));
    let size = match (list.max_page_size, remaining) {
        (Some(max), Some(rem)) => max.min(rem),
        (Some(max), None) => max,
        (None, Some(rem)) => rem,
        (None, None) => return None,
    };

    Some(match list.min_page_size {
        Some(min) => size.max(min),
        None => size.max(1),
    })
}

/// Stream the pages of `ctx`'s list operation
pub fn pages<'a>(
    provider: &'a dyn Provider,
    ctx: &'a ExecutionContext,
    filters: &'a [ApiFilter],
    limit: &'a RowLimit,
    stop: &'a CancellationToken,
) -> impl Stream<Item = Result<Page, ApiError>> + Send + 'a {
    stream::unfold(Cursor::Start, move |cursor| async move {
        let previous = match cursor {
            Cursor::Done => return None,
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
        };
        if stop.is_cancelled() {
            return None;
        }

        let request = ListRequest {
            filters,
            cursor: previous.as_deref(),
            page_size: page_size(&ctx.table.def.list, limit.remaining()),
        };
        tracing::debug!(
            "{} {} [{}] cursor={:?} page_size={:?}",
            ctx.table.name,
            ctx.table.def.list.operation,
            ctx.scope,
            request.cursor,
            request.page_size
        );

        match provider.list(ctx, &request).await {
            Ok(mut page) => {
                let next = match page.next_cursor.take().filter(|c| !c.is_empty()) {
                    None => Cursor::Done,
                    Some(token) if previous.as_deref() == Some(token.as_str()) => {
                        tracing::warn!(
                            "{} [{}]: API repeated cursor, stopping pagination",
                            ctx.table.name,
                            ctx.scope
                        );
                        Cursor::Done
                    },
                    Some(token) => {
                        page.next_cursor = Some(token.clone());
                        Cursor::Next(token)
                    },
                };
                Some((Ok(page), next))
            },
            Err(err) => Some((Err(err), Cursor::Done)),
        }
    })
}
