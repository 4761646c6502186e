//! Event domain — daemon event streaming, filtered and typed.

use futures_util::stream::{BoxStream, StreamExt};

use super::client::{DockerClient, DockerError};
use crate::events::model::{map_event, RuntimeEvent};

impl DockerClient {
    /// Stream typed volume/container events from the daemon.
    ///
    /// The daemon-side filter narrows the firehose to the two event types the
    /// service consumes; `map_event` then drops the actions it does not care
    /// about. The returned stream owns its own client handle, so it outlives
    /// `self` and can be moved into a worker task.
    pub fn subscribe_events(&self) -> BoxStream<'static, Result<RuntimeEvent, DockerError>> {
        use bollard::query_parameters::EventsOptionsBuilder;
        use std::collections::HashMap;

        let docker = self.client.clone();

        Box::pin(async_stream::stream! {
            let mut filters = HashMap::new();
            filters.insert("type", vec!["volume", "container"]);
            let options = EventsOptionsBuilder::default().filters(&filters).build();

            let mut inner = docker.events(Some(options));
            while let Some(item) = inner.next().await {
                match item {
                    Ok(msg) => {
                        if let Some(event) = map_event(&msg) {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(DockerError::from(e));
                        return;
                    }
                }
            }
        })
    }
}
