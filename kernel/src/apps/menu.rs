// Main menu overlay, opened with a long Ok on a home page.
//
// Items:
//   Battery  open the battery page (parent = current page)
//   Timer    open the interval timer
//   Rotate   turn the display a quarter
//
// Navigation while open:
//   short Up / Down   move selection (wraps)
//   short Ok          activate
//   long Ok / Up      close

use embedded_graphics::mono_font::ascii::FONT_7X13;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

use super::PageId;
use crate::display::{Framebuffer, WIDTH};
use crate::drivers::input::{Click, Key, KeyEvent};
use crate::ui;

const ITEMS: [(&str, MenuItem); 3] = [
    ("Battery", MenuItem::Open(PageId::Battery)),
    ("Timer", MenuItem::Open(PageId::Timer)),
    ("Rotate", MenuItem::Rotate),
];

const OVERLAY_W: u32 = 160;
const ITEM_H: u32 = 24;
const BORDER: u32 = 2;
const OVERLAY_H: u32 = ITEM_H * ITEMS.len() as u32 + BORDER * 2;
const OVERLAY_X: i32 = (WIDTH as i32 - OVERLAY_W as i32) / 2;
const OVERLAY_Y: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuItem {
    Open(PageId),
    Rotate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    None,
    Moved,
    Close,
    Open(PageId),
    Rotate,
}

pub struct MainMenu {
    selected: usize,
}

impl Default for MainMenu {
    fn default() -> Self {
        Self::new()
    }
}

impl MainMenu {
    pub const fn new() -> Self {
        Self { selected: 0 }
    }

    /// `arg` preselects an item; out of range starts at the top.
    pub fn on_create(&mut self, arg: u8) {
        self.selected = if (arg as usize) < ITEMS.len() {
            arg as usize
        } else {
            0
        };
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn on_key(&mut self, ev: KeyEvent) -> MenuAction {
        let n = ITEMS.len();
        match (ev.click, ev.key) {
            (Click::Short, Key::Up) => {
                self.selected = (self.selected + n - 1) % n;
                MenuAction::Moved
            }
            (Click::Short, Key::Down) => {
                self.selected = (self.selected + 1) % n;
                MenuAction::Moved
            }
            (Click::Short, Key::Ok) => match ITEMS[self.selected].1 {
                MenuItem::Open(page) => MenuAction::Open(page),
                MenuItem::Rotate => MenuAction::Rotate,
            },
            (Click::Long, Key::Ok | Key::Up) => MenuAction::Close,
            (Click::Long, Key::Down) => MenuAction::None,
        }
    }

    pub fn draw(&self, fb: &mut Framebuffer) {
        let frame = Rectangle::new(
            Point::new(OVERLAY_X, OVERLAY_Y),
            Size::new(OVERLAY_W, OVERLAY_H),
        );
        let _ = frame
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::Off))
            .draw(fb);
        let _ = frame
            .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, BORDER))
            .draw(fb);

        for (i, (label, _)) in ITEMS.iter().enumerate() {
            let area = Rectangle::new(
                Point::new(
                    OVERLAY_X + BORDER as i32,
                    OVERLAY_Y + BORDER as i32 + (i as u32 * ITEM_H) as i32,
                ),
                Size::new(OVERLAY_W - BORDER * 2, ITEM_H),
            );
            let _ = ui::row(fb, area, label, i == self.selected, &FONT_7X13);
        }
    }
}
