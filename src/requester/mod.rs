//! The query issuance boundary and the sequential plan executor.
//!
//! A `Requester` takes one native query and answers with a stream of rows.
//! Transports (HTTP to a broker, a warehouse API client) live outside this
//! crate; the executor only needs the trait.
//!
//! Levels of a plan run strictly in sequence: each nested level is bound to
//! a realized parent row, so a parent's stream is drained before any child
//! query is issued. Aborting the chain drops the in-flight stream and
//! discards every row produced so far.
//!
//! ```ignore
//! let (handle, registration) = AbortHandle::new_pair();
//! let rows = execute_plan(&plan, &requester, registration).await?;
//! ```

mod error;

pub use error::{RequesterError, RequesterResult};
pub use futures::future::{AbortHandle, AbortRegistration};

use async_trait::async_trait;
use futures::future::{Abortable, BoxFuture, FutureExt};
use futures::stream::{BoxStream, TryStreamExt};
use tracing::{debug, trace};

use crate::compile::{plan_level, NativeQuery, PlanNode, QueryPlan};
use crate::external::{ExternalValue, Row};

/// Rows produced by one query, errors surfacing in-band.
pub type RowStream = BoxStream<'static, RequesterResult<Row>>;

/// Issues native queries against one engine.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn request(&self, query: NativeQuery) -> RequesterResult<RowStream>;
}

/// Run every level of `plan`, attaching nested results to their parent rows.
pub async fn execute_plan(
    plan: &QueryPlan,
    requester: &dyn Requester,
    abort: AbortRegistration,
) -> RequesterResult<Vec<Row>> {
    let run = run_node(&plan.external, &plan.root, requester);
    match Abortable::new(run, abort).await {
        Ok(result) => result,
        Err(_aborted) => {
            debug!("query chain cancelled");
            Err(RequesterError::Cancelled)
        }
    }
}

fn run_node<'a>(
    external: &'a ExternalValue,
    node: &'a PlanNode,
    requester: &'a dyn Requester,
) -> BoxFuture<'a, RequesterResult<Vec<Row>>> {
    async move {
        let mut rows = match &node.query {
            Some(query) => {
                let stream = requester.request(query.clone()).await?;
                let raw: Vec<Row> = stream.try_collect().await?;
                trace!(rows = raw.len(), "drained query");
                node.post.apply(raw)
            }
            None => vec![Row::new()],
        };

        for row in rows.iter_mut() {
            for nested in &node.nested {
                let bound = nested.bind(&node.split_keys, row, external)?;
                let child = plan_level(external, &bound)?;
                let child_rows = run_node(external, &child, requester).await?;
                row.insert(
                    nested.name.clone(),
                    serde_json::Value::Array(
                        child_rows.into_iter().map(serde_json::Value::Object).collect(),
                    ),
                );
            }
        }
        Ok(rows)
    }
    .boxed()
}
