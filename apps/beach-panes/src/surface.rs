use std::time::Duration;

use crate::status::Overlay;

/// The terminal renderer a pane draws into.
///
/// Keystrokes and resizes flow the other way: the host forwards them to
/// [`SessionController::send_input`](crate::controller::SessionController::send_input)
/// and [`SessionController::resize`](crate::controller::SessionController::resize).
pub trait RenderSurface: Send + Sync {
    /// Raw PTY bytes or status banners.
    fn write(&self, bytes: &[u8]);

    fn reset(&self);

    fn focus(&self);

    /// Shows or clears the status overlay. Surfaces without a real overlay
    /// layer get the rendered box written inline.
    fn set_overlay(&self, overlay: Option<&Overlay>) {
        if let Some(overlay) = overlay {
            self.write(overlay.render().as_bytes());
        }
    }

    /// Time until the next reconnect attempt, roughly once per second.
    fn update_countdown(&self, _remaining: Duration) {}
}
