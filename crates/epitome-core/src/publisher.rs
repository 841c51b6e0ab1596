use std::sync::Arc;

use crate::gateway::Gateway;
use crate::render::OutboundMessage;
use crate::router::RoutingMap;
use crate::Result;

/// Counters for one publishing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: u32,
    pub failed: u32,
}

/// Renders messages and hands their segments to the gateway
pub struct Publisher {
    gateway: Arc<dyn Gateway>,
    budget: usize,
}

impl Publisher {
    pub fn new(gateway: Arc<dyn Gateway>, budget: usize) -> Self {
        Self {
            gateway,
            budget,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Render one message and deliver its segments in order.
    ///
    /// Stops at the first failed segment so a destination never sees the
    /// tail of a message without its head.
    pub async fn send(&self, destination_id: &str, message: &OutboundMessage) -> Result<()> {
        for segment in message.render(self.budget) {
            self.gateway.send_message(destination_id, &segment).await?;
        }
        tracing::debug!(destination_id, kind = message.kind(), "Message delivered");
        Ok(())
    }

    /// Deliver a run's routed publications, destination by destination.
    ///
    /// Failures are logged and counted; they never stop other deliveries and
    /// are not retried in the same run.
    pub async fn publish(&self, routing: RoutingMap) -> PublishReport {
        let mut report = PublishReport::default();

        for (destination_id, routed) in routing {
            for item in routed {
                let title = item.publication.title.clone();
                let message = OutboundMessage::Post {
                    publication: item.publication,
                    matched_filters: item.matched_filters,
                };

                match self.send(&destination_id, &message).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        tracing::error!(destination_id = %destination_id, title = %title, "Delivery failed: {}", e);
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }
}
