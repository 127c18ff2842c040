//! Single-threaded event loop driving a `MarkerContext`

use std::fmt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::channel::Inbound;
use crate::controller::MarkerContext;
use crate::dom::Document;

type Mutation = Box<dyn FnOnce(&mut Document) + Send>;

/// Notifications from the host page
pub enum HostEvent {
    /// Structural or content change applied by the host
    Mutate(Mutation),

    /// Viewport scrolled to an absolute offset
    Scroll { x: f64, y: f64 },

    Resize { width: f64, height: f64 },

    Shutdown,
}

impl HostEvent {
    pub fn mutate(f: impl FnOnce(&mut Document) + Send + 'static) -> Self {
        Self::Mutate(Box::new(f))
    }
}

impl fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mutate(_) => f.write_str("Mutate(..)"),
            Self::Scroll { x, y } => write!(f, "Scroll {{ x: {x}, y: {y} }}"),
            Self::Resize { width, height } => write!(f, "Resize {{ width: {width}, height: {height} }}"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Run until `Shutdown` arrives or every host sender is gone.
///
/// Disposal is left to the caller so the document can still be inspected.
pub async fn run(
    doc: &mut Document,
    ctx: &mut MarkerContext,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    mut host: mpsc::UnboundedReceiver<HostEvent>,
) {
    let mut sweep = tokio::time::interval(ctx.config().sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Event loop started");

    loop {
        tokio::select! {
            Some(item) = inbound.recv() => {
                ctx.handle(doc, item);
            }
            event = host.recv() => {
                let Some(event) = event else {
                    debug!("Host event source closed");
                    break;
                };
                match event {
                    HostEvent::Mutate(apply) => apply(doc),
                    HostEvent::Scroll { x, y } => {
                        doc.scroll_to(x, y);
                        ctx.on_viewport_change(doc);
                    }
                    HostEvent::Resize { width, height } => {
                        doc.resize_viewport(width, height);
                        ctx.on_viewport_change(doc);
                    }
                    HostEvent::Shutdown => break,
                }
            }
            _ = sweep.tick() => {
                ctx.sweep(doc);
            }
        }

        if doc.has_pending_mutations() {
            ctx.handle_mutations(doc);
        }
    }
    info!("Event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPatch, MarkerConfig};
    use crate::constants::dom::OVERLAY_ATTR;
    use crate::controller::LifecycleState;
    use crate::dom::{NodeId, Rect};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn labeled(doc: &mut Document, tag: &str, label: &str) -> NodeId {
        let id = doc.create_element(tag);
        doc.set_attribute(id, "data-id", label).unwrap();
        doc.append_child(doc.body(), id).unwrap();
        id
    }

    fn config(port: u16) -> MarkerConfig {
        MarkerConfig {
            port,
            select_delay_ms: 20,
            reconnect_interval_ms: 100,
            ..MarkerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_host_events_update_overlays() {
        let mut doc = Document::new();
        let input = labeled(&mut doc, "input", "query");
        doc.set_rect(input, Rect::new(0.0, 400.0, 200.0, 40.0)).unwrap();
        let (mut ctx, inbound) = MarkerContext::new(config(1));
        ctx.init(&mut doc, ConfigPatch::default());
        let overlay = ctx.renderer().overlay(input).unwrap().node;

        let (host_tx, host_rx) = mpsc::unbounded_channel();
        host_tx.send(HostEvent::Scroll { x: 0.0, y: 100.0 }).unwrap();
        host_tx
            .send(HostEvent::mutate(|doc| {
                let button = doc.create_element("button");
                doc.set_attribute(button, "data-id", "late").unwrap();
                let body = doc.body();
                doc.append_child(body, button).unwrap();
            }))
            .unwrap();
        host_tx.send(HostEvent::Shutdown).unwrap();

        timeout(WAIT, run(&mut doc, &mut ctx, inbound, host_rx)).await.unwrap();

        // client top 300, centered 16px glyph in a 40px box
        assert_eq!(doc.style(overlay, "top"), Some("312px"));
        assert_eq!(
            doc.query(doc.root(), |el| el.has_attribute(OVERLAY_ATTR)).len(),
            2
        );
        assert_eq!(ctx.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_agent_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut doc = Document::new();
        let submit = labeled(&mut doc, "button", "submit");
        doc.set_rect(submit, Rect::new(10.0, 10.0, 100.0, 30.0)).unwrap();
        let combo = labeled(&mut doc, "div", "size");
        doc.set_attribute(combo, "role", "combobox").unwrap();
        let option = doc.create_element("li");
        doc.set_attribute(option, "role", "option").unwrap();
        doc.set_text(option, "Large").unwrap();
        let body = doc.body();
        doc.append_child(body, option).unwrap();

        let (mut ctx, inbound) = MarkerContext::new(config(port));
        ctx.init(&mut doc, ConfigPatch::default());
        let (host_tx, host_rx) = mpsc::unbounded_channel();

        let agent = async move {
            let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            // the engine may not have flagged the connection yet, retry until answered
            let searched = timeout(WAIT, async {
                loop {
                    write.write_all(b"search:submit\n").await.unwrap();
                    if let Ok(Ok(Some(line))) =
                        timeout(Duration::from_millis(100), lines.next_line()).await
                    {
                        return line;
                    }
                }
            })
            .await
            .unwrap();

            write.write_all(b"select:size:Large\n").await.unwrap();
            let mut selected = lines.next_line().await.unwrap().unwrap();
            // drain duplicate search answers from retries
            while selected.starts_with(r#"{"found""#) {
                selected = lines.next_line().await.unwrap().unwrap();
            }
            host_tx.send(HostEvent::Shutdown).unwrap();
            (searched, selected)
        };

        let (_, (searched, selected)) =
            timeout(WAIT, async { tokio::join!(run(&mut doc, &mut ctx, inbound, host_rx), agent) })
                .await
                .unwrap();

        assert_eq!(
            searched,
            r#"{"found":true,"visible":true,"id":"submit","direction":null,"offsetX":0,"offsetY":0}"#
        );
        assert_eq!(selected, r#"{"success":true}"#);
        ctx.dispose(&mut doc);
        assert!(!ctx.is_connected());
    }

    #[tokio::test]
    async fn test_sweep_releases_orphaned_detached_overlay() {
        let mut doc = Document::new();
        let input = labeled(&mut doc, "input", "gone");
        let (mut ctx, inbound) = MarkerContext::new(MarkerConfig {
            sweep_interval_ms: 100,
            ..config(1)
        });
        ctx.init(&mut doc, ConfigPatch::default());
        // removal while unobserved leaves the registry stale
        doc.set_observed(false);
        doc.remove(input).unwrap();

        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let stopper = async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            host_tx.send(HostEvent::Shutdown).unwrap();
        };
        timeout(WAIT, async { tokio::join!(run(&mut doc, &mut ctx, inbound, host_rx), stopper) })
            .await
            .unwrap();

        assert!(!ctx.renderer().contains(input));
        assert_eq!(
            doc.query(doc.root(), |el| el.has_attribute(OVERLAY_ATTR)).len(),
            0
        );
    }
}
