/// Pixel rectangle with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Intersection with a `width`×`height` target.
    pub fn clamped(&self, width: u32, height: u32) -> Viewport {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Viewport {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x as f32
            && y >= self.y as f32
            && x < (self.x + self.width) as f32
            && y < (self.y + self.height) as f32
    }
}

/// RGBA8 color buffer with a depth buffer of the same size.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    width: u32,
    height: u32,
    color: Vec<u8>,
    depth: Vec<f32>,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        let w = width.max(1);
        let h = height.max(1);
        let pixels = (w as usize) * (h as usize);
        Self {
            width: w,
            height: h,
            color: vec![0; pixels * 4],
            depth: vec![1.0; pixels],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reallocates when the size changes. Contents are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width.max(1) == self.width && height.max(1) == self.height {
            return;
        }
        *self = Self::new(width, height);
    }

    pub fn clear_color(&mut self, rgba: [u8; 4], area: Option<Viewport>) {
        let area = self.area(area);
        for y in area.y..area.y + area.height {
            for x in area.x..area.x + area.width {
                let at = self.offset(x, y) * 4;
                self.color[at..at + 4].copy_from_slice(&rgba);
            }
        }
    }

    pub fn clear_depth(&mut self, area: Option<Viewport>) {
        let area = self.area(area);
        for y in area.y..area.y + area.height {
            for x in area.x..area.x + area.width {
                let at = self.offset(x, y);
                self.depth[at] = 1.0;
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0; 4];
        }
        let at = self.offset(x, y) * 4;
        [
            self.color[at],
            self.color[at + 1],
            self.color[at + 2],
            self.color[at + 3],
        ]
    }

    /// Copies a rectangle of RGBA rows, top row first. Pixels outside the
    /// target read as zero.
    pub fn read_pixels(&self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for row in y..y + height {
            for col in x..x + width {
                out.extend_from_slice(&self.pixel(col, row));
            }
        }
        out
    }

    pub fn pixels(&self) -> &[u8] {
        &self.color
    }

    pub(crate) fn depth_at(&self, x: u32, y: u32) -> f32 {
        self.depth[self.offset(x, y)]
    }

    pub(crate) fn set_depth(&mut self, x: u32, y: u32, value: f32) {
        let at = self.offset(x, y);
        self.depth[at] = value;
    }

    pub(crate) fn write_color(&mut self, x: u32, y: u32, rgb: [f32; 3], opacity: f32) {
        let at = self.offset(x, y) * 4;
        let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        if opacity >= 1.0 {
            self.color[at] = byte(rgb[0]);
            self.color[at + 1] = byte(rgb[1]);
            self.color[at + 2] = byte(rgb[2]);
            self.color[at + 3] = 255;
            return;
        }
        for (i, channel) in rgb.iter().enumerate() {
            let dst = self.color[at + i] as f32 / 255.0;
            self.color[at + i] = byte(channel * opacity + dst * (1.0 - opacity));
        }
        let dst_alpha = self.color[at + 3] as f32 / 255.0;
        self.color[at + 3] = byte(opacity + dst_alpha * (1.0 - opacity));
    }

    pub(crate) fn write_exact(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let at = self.offset(x, y) * 4;
        self.color[at..at + 3].copy_from_slice(&rgb);
        self.color[at + 3] = 255;
    }

    fn area(&self, area: Option<Viewport>) -> Viewport {
        area.unwrap_or(Viewport::full(self.width, self.height))
            .clamped(self.width, self.height)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + x as usize
    }
}
