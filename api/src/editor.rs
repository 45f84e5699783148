use sentinel_common::{StopSignal, TaskHandle};
use sentinel_vision::{ZoneDefinition, ZoneEditError, ZoneEditorState, ZoneEvent, ZoneView};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

const EVENT_QUEUE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Rejected(#[from] ZoneEditError),
    #[error("zone editor is not running")]
    Closed,
}

struct EditRequest {
    event: ZoneEvent,
    reply: oneshot::Sender<Result<ZoneView, ZoneEditError>>,
}

/// Client side of the zone editor task.
#[derive(Clone)]
pub struct ZoneEditorHandle {
    events: mpsc::Sender<EditRequest>,
    view: watch::Receiver<ZoneView>,
}

impl ZoneEditorHandle {
    /// Apply one event and return the resulting view.
    pub async fn send(&self, event: ZoneEvent) -> Result<ZoneView, EditorError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(EditRequest { event, reply })
            .await
            .map_err(|_| EditorError::Closed)?;
        let outcome = rx.await.map_err(|_| EditorError::Closed)?;
        Ok(outcome?)
    }

    pub fn view(&self) -> ZoneView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ZoneView> {
        self.view.clone()
    }
}

/// Start the task that owns the zone state. Every accepted event publishes a
/// fresh [`ZoneView`].
pub fn spawn_editor(initial: Option<ZoneDefinition>) -> (ZoneEditorHandle, TaskHandle) {
    let state = ZoneEditorState::new(initial);
    let (view_tx, view_rx) = watch::channel(state.view().clone());
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

    let task = TaskHandle::spawn("zone-editor", move |stop| run(state, events_rx, view_tx, stop));
    let handle = ZoneEditorHandle {
        events: events_tx,
        view: view_rx,
    };
    (handle, task)
}

async fn run(
    mut state: ZoneEditorState,
    mut events: mpsc::Receiver<EditRequest>,
    view_tx: watch::Sender<ZoneView>,
    mut stop: StopSignal,
) {
    loop {
        let request = tokio::select! {
            _ = stop.stopped() => break,
            request = events.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let outcome = state.apply(request.event).map(|()| {
            let view = state.view().clone();
            view_tx.send_replace(view.clone());
            view
        });
        // The requester may have gone away; the edit stands either way
        let _ = request.reply.send(outcome);
    }
    info!("zone editor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_vision::geometry::{Point, Rect};

    #[tokio::test]
    async fn accepted_events_reach_watchers() {
        let (editor, mut task) = spawn_editor(None);
        let mut watcher = editor.subscribe();

        for (x, y) in [(0, 0), (100, 0), (50, 80)] {
            editor.send(ZoneEvent::PointAdded(Point::new(x, y))).await.unwrap();
        }
        let view = editor.send(ZoneEvent::ZoneFinalized).await.unwrap();
        assert!(view.active.is_some());

        watcher.changed().await.unwrap();
        assert!(watcher.borrow_and_update().active.is_some());
        task.stop().await;
    }

    #[tokio::test]
    async fn rejected_event_leaves_view_alone() {
        let rect = ZoneDefinition::Rectangle(Rect::new(0, 0, 10, 10));
        let (editor, mut task) = spawn_editor(Some(rect.clone()));

        let err = editor
            .send(ZoneEvent::PointAdded(Point::new(1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::Rejected(ZoneEditError::ZoneActive)));
        assert_eq!(editor.view().active, Some(rect));
        task.stop().await;
    }

    #[tokio::test]
    async fn send_after_stop_reports_closed() {
        let (editor, mut task) = spawn_editor(None);
        task.stop().await;
        let err = editor.send(ZoneEvent::ZoneCleared).await.unwrap_err();
        assert!(matches!(err, EditorError::Closed));
    }
}
