//! Interactive zone editing as a stream of typed events.
//!
//! The owner applies events one at a time and hands out [`ZoneView`]
//! snapshots; nothing else holds the state.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::geometry::{Point, Polygon};
use crate::zone::ZoneDefinition;

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    PointAdded(Point),
    ZoneFinalized,
    ZoneCleared,
    ZoneReplaced(ZoneDefinition),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneEditError {
    #[error("a zone is already active; clear it before placing new points")]
    ZoneActive,
    #[error("a zone needs at least 3 points, {0} placed")]
    TooFewPoints(usize),
    #[error("the placed points do not enclose an area")]
    Degenerate,
    #[error("point ({x}, {y}) is outside the accepted coordinate range")]
    OutOfRange { x: i32, y: i32 },
}

/// What the pipeline draws and tests against on its next pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneView {
    pub active: Option<ZoneDefinition>,
    pub pending: Vec<Point>,
}

#[derive(Debug, Default)]
pub struct ZoneEditorState {
    view: ZoneView,
}

impl ZoneEditorState {
    pub fn new(initial: Option<ZoneDefinition>) -> Self {
        Self {
            view: ZoneView {
                active: initial,
                pending: Vec::new(),
            },
        }
    }

    pub fn view(&self) -> &ZoneView {
        &self.view
    }

    /// A rejected event leaves the state untouched.
    pub fn apply(&mut self, event: ZoneEvent) -> Result<(), ZoneEditError> {
        match event {
            ZoneEvent::PointAdded(point) => {
                if self.view.active.is_some() {
                    return Err(ZoneEditError::ZoneActive);
                }
                if !point.in_range() {
                    return Err(ZoneEditError::OutOfRange {
                        x: point.x,
                        y: point.y,
                    });
                }
                self.view.pending.push(point);
                debug!(
                    x = point.x,
                    y = point.y,
                    pending = self.view.pending.len(),
                    "zone point added"
                );
            }
            ZoneEvent::ZoneFinalized => {
                let count = self.view.pending.len();
                if count < 3 {
                    warn!(points = count, "need at least 3 points to finalize the zone");
                    return Err(ZoneEditError::TooFewPoints(count));
                }
                let Some(polygon) = Polygon::new(self.view.pending.clone()) else {
                    warn!(points = count, "placed points do not form a polygon");
                    return Err(ZoneEditError::Degenerate);
                };
                self.view.pending.clear();
                self.view.active = Some(ZoneDefinition::Polygon(polygon));
                info!(points = count, "zone finalized");
            }
            ZoneEvent::ZoneCleared => {
                self.view = ZoneView::default();
                info!("zone cleared");
            }
            ZoneEvent::ZoneReplaced(zone) => {
                self.view = ZoneView {
                    active: Some(zone),
                    pending: Vec::new(),
                };
                info!("zone replaced");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn add(state: &mut ZoneEditorState, x: i32, y: i32) -> Result<(), ZoneEditError> {
        state.apply(ZoneEvent::PointAdded(Point::new(x, y)))
    }

    #[test]
    fn points_then_finalize_builds_polygon() {
        let mut state = ZoneEditorState::default();
        add(&mut state, 0, 0).unwrap();
        add(&mut state, 100, 0).unwrap();
        add(&mut state, 50, 80).unwrap();
        state.apply(ZoneEvent::ZoneFinalized).unwrap();

        let view = state.view();
        assert!(view.pending.is_empty());
        match &view.active {
            Some(ZoneDefinition::Polygon(p)) => assert_eq!(p.points().len(), 3),
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn finalize_with_two_points_is_rejected() {
        let mut state = ZoneEditorState::default();
        add(&mut state, 0, 0).unwrap();
        add(&mut state, 10, 10).unwrap();
        assert_eq!(
            state.apply(ZoneEvent::ZoneFinalized),
            Err(ZoneEditError::TooFewPoints(2))
        );
        assert_eq!(state.view().pending.len(), 2);
        assert!(state.view().active.is_none());
    }

    #[test]
    fn clicking_the_start_point_twice_still_closes_the_zone() {
        let mut state = ZoneEditorState::default();
        for (x, y) in [(0, 0), (100, 0), (50, 80), (0, 0), (0, 0)] {
            add(&mut state, x, y).unwrap();
        }
        state.apply(ZoneEvent::ZoneFinalized).unwrap();
        match &state.view().active {
            Some(ZoneDefinition::Polygon(p)) => assert_eq!(p.points().len(), 3),
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn points_without_area_are_rejected() {
        let mut state = ZoneEditorState::default();
        for (x, y) in [(0, 0), (0, 0), (10, 10), (0, 0)] {
            add(&mut state, x, y).unwrap();
        }
        assert_eq!(
            state.apply(ZoneEvent::ZoneFinalized),
            Err(ZoneEditError::Degenerate)
        );
        assert_eq!(state.view().pending.len(), 4);
        assert!(state.view().active.is_none());
    }

    #[test]
    fn out_of_range_point_is_rejected() {
        let mut state = ZoneEditorState::default();
        assert_eq!(
            add(&mut state, i32::MIN, 5),
            Err(ZoneEditError::OutOfRange { x: i32::MIN, y: 5 })
        );
        assert!(state.view().pending.is_empty());
    }

    #[test]
    fn points_rejected_while_zone_active() {
        let rect = ZoneDefinition::Rectangle(Rect::new(0, 0, 10, 10));
        let mut state = ZoneEditorState::new(Some(rect));
        assert_eq!(add(&mut state, 1, 1), Err(ZoneEditError::ZoneActive));
        assert!(state.view().pending.is_empty());
    }

    #[test]
    fn clear_empties_everything() {
        let rect = ZoneDefinition::Rectangle(Rect::new(0, 0, 10, 10));
        let mut state = ZoneEditorState::new(Some(rect));
        state.apply(ZoneEvent::ZoneCleared).unwrap();
        assert_eq!(*state.view(), ZoneView::default());

        add(&mut state, 1, 1).unwrap();
        state.apply(ZoneEvent::ZoneCleared).unwrap();
        assert!(state.view().pending.is_empty());
    }

    #[test]
    fn replace_drops_pending_points() {
        let mut state = ZoneEditorState::default();
        add(&mut state, 1, 1).unwrap();
        let rect = ZoneDefinition::Rectangle(Rect::new(0, 0, 10, 10));
        state.apply(ZoneEvent::ZoneReplaced(rect.clone())).unwrap();
        assert_eq!(state.view().active, Some(rect));
        assert!(state.view().pending.is_empty());
    }
}
