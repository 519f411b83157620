//! Pointer input in client (CSS pixel) coordinates, plus the translation
//! from winit window events.

use glam::Vec2;
use winit::dpi::PhysicalPosition;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, Touch, TouchPhase, WindowEvent};
use winit::keyboard::ModifiersState;

/// Primary, middle and secondary buttons, numbered like DOM pointer events.
pub const BUTTON_PRIMARY: u8 = 0;
pub const BUTTON_MIDDLE: u8 = 1;
pub const BUTTON_SECONDARY: u8 = 2;

/// Wheel pixels that count as one line.
const PIXELS_PER_LINE: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Touch,
    Pen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerInput {
    pub client: Vec2,
    pub button: u8,
    /// Only the primary pointer of a multi-touch gesture drives selection.
    pub primary: bool,
    pub kind: PointerKind,
    pub ctrl: bool,
    pub alt: bool,
}

impl PointerInput {
    pub fn mouse(x: f32, y: f32) -> Self {
        Self {
            client: Vec2::new(x, y),
            button: BUTTON_PRIMARY,
            primary: true,
            kind: PointerKind::Mouse,
            ctrl: false,
            alt: false,
        }
    }

    pub fn touch(x: f32, y: f32) -> Self {
        Self {
            kind: PointerKind::Touch,
            ..Self::mouse(x, y)
        }
    }

    pub fn with_button(mut self, button: u8) -> Self {
        self.button = button;
        self
    }

    pub fn with_ctrl(mut self, ctrl: bool) -> Self {
        self.ctrl = ctrl;
        self
    }

    pub fn with_alt(mut self, alt: bool) -> Self {
        self.alt = alt;
        self
    }

    pub fn is_touch(&self) -> bool {
        self.kind == PointerKind::Touch
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerDown(PointerInput),
    PointerMove(PointerInput),
    PointerUp(PointerInput),
    /// Pointer left the canvas; handled like a release.
    PointerLeave(PointerInput),
    /// `delta` in lines, positive away from the user.
    Wheel { client: Vec2, delta: f32 },
}

/// Tracks cursor, modifier and touch state across winit events.
#[derive(Debug)]
pub struct WinitInput {
    cursor: Vec2,
    button: u8,
    modifiers: ModifiersState,
    scale_factor: f64,
    primary_touch: Option<u64>,
}

impl WinitInput {
    pub fn new(scale_factor: f64) -> Self {
        Self {
            cursor: Vec2::ZERO,
            button: BUTTON_PRIMARY,
            modifiers: ModifiersState::empty(),
            scale_factor,
            primary_touch: None,
        }
    }

    pub fn cursor(&self) -> Vec2 {
        self.cursor
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn translate(&mut self, event: &WindowEvent) -> Option<InputEvent> {
        match event {
            WindowEvent::CursorMoved { position, .. } => Some(self.cursor_moved(*position)),
            WindowEvent::MouseInput { state, button, .. } => self.mouse_input(*state, *button),
            WindowEvent::ModifiersChanged(modifiers) => {
                self.set_modifiers(modifiers.state());
                None
            }
            WindowEvent::Touch(touch) => self.touch(touch),
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / PIXELS_PER_LINE,
                };
                Some(InputEvent::Wheel {
                    client: self.cursor,
                    delta: lines,
                })
            }
            WindowEvent::CursorLeft { .. } => Some(InputEvent::PointerLeave(self.mouse_pointer())),
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                self.scale_factor = *scale_factor;
                None
            }
            _ => None,
        }
    }

    pub fn set_modifiers(&mut self, modifiers: ModifiersState) {
        self.modifiers = modifiers;
    }

    fn to_client(&self, position: PhysicalPosition<f64>) -> Vec2 {
        let logical = position.to_logical::<f64>(self.scale_factor);
        Vec2::new(logical.x as f32, logical.y as f32)
    }

    fn mouse_pointer(&self) -> PointerInput {
        PointerInput {
            client: self.cursor,
            button: self.button,
            primary: true,
            kind: PointerKind::Mouse,
            ctrl: self.modifiers.control_key(),
            alt: self.modifiers.alt_key(),
        }
    }

    fn cursor_moved(&mut self, position: PhysicalPosition<f64>) -> InputEvent {
        self.cursor = self.to_client(position);
        InputEvent::PointerMove(self.mouse_pointer())
    }

    fn mouse_input(&mut self, state: ElementState, button: MouseButton) -> Option<InputEvent> {
        self.button = match button {
            MouseButton::Left => BUTTON_PRIMARY,
            MouseButton::Middle => BUTTON_MIDDLE,
            MouseButton::Right => BUTTON_SECONDARY,
            _ => return None,
        };
        let pointer = self.mouse_pointer();
        Some(match state {
            ElementState::Pressed => InputEvent::PointerDown(pointer),
            ElementState::Released => InputEvent::PointerUp(pointer),
        })
    }

    fn touch(&mut self, touch: &Touch) -> Option<InputEvent> {
        if touch.phase == TouchPhase::Started && self.primary_touch.is_none() {
            self.primary_touch = Some(touch.id);
        }
        let primary = self.primary_touch == Some(touch.id);
        let pointer = PointerInput {
            client: self.to_client(touch.location),
            button: BUTTON_PRIMARY,
            primary,
            kind: PointerKind::Touch,
            ctrl: self.modifiers.control_key(),
            alt: self.modifiers.alt_key(),
        };
        Some(match touch.phase {
            TouchPhase::Started => InputEvent::PointerDown(pointer),
            TouchPhase::Moved => InputEvent::PointerMove(pointer),
            TouchPhase::Ended | TouchPhase::Cancelled => {
                if primary {
                    self.primary_touch = None;
                }
                InputEvent::PointerUp(pointer)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::event::DeviceId;

    fn device() -> DeviceId {
        // SAFETY: only compared against other dummy ids in these tests.
        unsafe { DeviceId::dummy() }
    }

    fn touch(id: u64, phase: TouchPhase, x: f64, y: f64) -> Touch {
        Touch {
            device_id: device(),
            phase,
            location: PhysicalPosition::new(x, y),
            force: None,
            id,
        }
    }

    #[test]
    fn cursor_positions_are_in_client_pixels() {
        let mut input = WinitInput::new(2.0);
        let event = input.translate(&WindowEvent::CursorMoved {
            device_id: device(),
            position: PhysicalPosition::new(200.0, 100.0),
        });
        match event {
            Some(InputEvent::PointerMove(pointer)) => assert_eq!(pointer.client, Vec2::new(100.0, 50.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn buttons_and_modifiers_are_carried() {
        let mut input = WinitInput::new(1.0);
        input.set_modifiers(ModifiersState::CONTROL);
        let down = input.translate(&WindowEvent::MouseInput {
            device_id: device(),
            state: ElementState::Pressed,
            button: MouseButton::Right,
        });
        let Some(InputEvent::PointerDown(pointer)) = down else {
            panic!("expected a pointer down, got {:?}", down);
        };
        assert_eq!(pointer.button, BUTTON_SECONDARY);
        assert!(pointer.ctrl && !pointer.alt);

        let up = input.translate(&WindowEvent::MouseInput {
            device_id: device(),
            state: ElementState::Released,
            button: MouseButton::Left,
        });
        assert!(matches!(up, Some(InputEvent::PointerUp(p)) if p.button == BUTTON_PRIMARY));
    }

    #[test]
    fn only_the_first_touch_is_primary() {
        let mut input = WinitInput::new(1.0);
        let first = input.translate(&WindowEvent::Touch(touch(7, TouchPhase::Started, 10.0, 10.0)));
        let second = input.translate(&WindowEvent::Touch(touch(8, TouchPhase::Started, 50.0, 50.0)));
        assert!(matches!(first, Some(InputEvent::PointerDown(p)) if p.primary && p.is_touch()));
        assert!(matches!(second, Some(InputEvent::PointerDown(p)) if !p.primary));

        input.translate(&WindowEvent::Touch(touch(7, TouchPhase::Ended, 10.0, 10.0)));
        let next = input.translate(&WindowEvent::Touch(touch(9, TouchPhase::Started, 5.0, 5.0)));
        assert!(matches!(next, Some(InputEvent::PointerDown(p)) if p.primary));
    }

    #[test]
    fn pixel_scroll_is_converted_to_lines() {
        let mut input = WinitInput::new(1.0);
        let wheel = input.translate(&WindowEvent::MouseWheel {
            device_id: device(),
            delta: MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 40.0)),
            phase: TouchPhase::Moved,
        });
        assert_eq!(
            wheel,
            Some(InputEvent::Wheel {
                client: Vec2::ZERO,
                delta: 2.0
            })
        );
    }
}
