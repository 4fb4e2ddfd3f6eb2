//! # Coordinate Projector
//!
//! Maps coordinates emitted by a decision model into physical screen
//! pixels. Three conventions are understood:
//!
//! - **Relative**: fractions of the screen in `[0, 1]`
//! - **Absolute**: pixels of the (possibly downscaled) image the model saw
//! - **Model-normalized**: pixels of the image after the model's
//!   aligned resize (see [`smart_resize`])

use crate::script::ast::{Expr, Keyword, Program, Stmt, UnaryOp};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default side alignment of the model-normalized resize.
pub const DEFAULT_ALIGNMENT_FACTOR: u32 = 28;
/// Default lower bound on resized pixel count.
pub const DEFAULT_MIN_PIXELS: u64 = 56 * 56;
/// Default upper bound on resized pixel count.
pub const DEFAULT_MAX_PIXELS: u64 = 14 * 14 * 4 * 16384;

/// Errors raised by projection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("Screen dimensions must be positive, got {width}x{height}")]
    InvalidScreen { width: u32, height: u32 },

    #[error("Alignment factor must be positive")]
    InvalidFactor,

    #[error("Image {height}x{width} is smaller than the alignment factor {factor}")]
    TooSmall { height: u32, width: u32, factor: u32 },

    #[error("Coordinate is not finite: ({0}, {1})")]
    NonFinite(f64, f64),
}

/// Coordinate convention of a decision backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    #[default]
    Relative,
    Absolute,
    #[serde(alias = "qwen25")]
    ModelNormalized,
}

impl fmt::Display for CoordinateSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative => write!(f, "relative"),
            Self::Absolute => write!(f, "absolute"),
            Self::ModelNormalized => write!(f, "model_normalized"),
        }
    }
}

impl std::str::FromStr for CoordinateSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relative" => Ok(Self::Relative),
            "absolute" => Ok(Self::Absolute),
            "model_normalized" | "qwen25" => Ok(Self::ModelNormalized),
            _ => Err(format!("Unknown coordinate space: {}", s)),
        }
    }
}

/// Parameters of the model's aligned resize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeParams {
    pub factor: u32,
    pub min_pixels: u64,
    pub max_pixels: u64,
}

impl Default for ResizeParams {
    fn default() -> Self {
        Self {
            factor: DEFAULT_ALIGNMENT_FACTOR,
            min_pixels: DEFAULT_MIN_PIXELS,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

fn round_by_factor(value: f64, factor: f64) -> f64 {
    (value / factor).round_ties_even() * factor
}

/// Resize `(height, width)` so both sides are multiples of `factor` and the
/// area lies within `[min_pixels, max_pixels]`, keeping the aspect ratio as
/// close as possible. Returns `(height, width)`.
pub fn smart_resize(height: u32, width: u32, params: &ResizeParams) -> Result<(u32, u32), ProjectionError> {
    if params.factor == 0 {
        return Err(ProjectionError::InvalidFactor);
    }
    if height < params.factor || width < params.factor {
        return Err(ProjectionError::TooSmall {
            height,
            width,
            factor: params.factor,
        });
    }

    let f = params.factor as f64;
    let (h, w) = (height as f64, width as f64);
    let mut h_bar = round_by_factor(h, f).max(f);
    let mut w_bar = round_by_factor(w, f).max(f);
    let area = h_bar * w_bar;

    if area > params.max_pixels as f64 {
        let beta = (h * w / params.max_pixels as f64).sqrt();
        h_bar = ((h / beta / f).floor() * f).max(f);
        w_bar = ((w / beta / f).floor() * f).max(f);
    } else if area < params.min_pixels as f64 {
        let beta = (params.min_pixels as f64 / (h * w)).sqrt();
        h_bar = (h * beta / f).ceil() * f;
        w_bar = (w * beta / f).ceil() * f;
    }

    Ok((h_bar as u32, w_bar as u32))
}

/// Projects model coordinates onto the physical screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Projector {
    space: CoordinateSpace,
    screen_width: u32,
    screen_height: u32,
    resize: ResizeParams,
}

impl Projector {
    /// Create a projector for a screen of the given size.
    pub fn new(
        space: CoordinateSpace,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<Self, ProjectionError> {
        Self::with_resize(space, screen_width, screen_height, ResizeParams::default())
    }

    /// Create a projector with explicit resize parameters.
    pub fn with_resize(
        space: CoordinateSpace,
        screen_width: u32,
        screen_height: u32,
        resize: ResizeParams,
    ) -> Result<Self, ProjectionError> {
        if screen_width == 0 || screen_height == 0 {
            return Err(ProjectionError::InvalidScreen {
                width: screen_width,
                height: screen_height,
            });
        }
        if resize.factor == 0 {
            return Err(ProjectionError::InvalidFactor);
        }
        Ok(Self {
            space,
            screen_width,
            screen_height,
            resize,
        })
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    /// Project `(x, y)` to screen pixels. `scale` is the screen-to-model
    /// image ratio and only affects the absolute convention.
    pub fn project(&self, x: f64, y: f64, scale: f64) -> Result<(i32, i32), ProjectionError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::NonFinite(x, y));
        }

        match self.space {
            CoordinateSpace::Relative => Ok((
                to_pixel((x * self.screen_width as f64).round_ties_even()),
                to_pixel((y * self.screen_height as f64).round_ties_even()),
            )),
            CoordinateSpace::Absolute => Ok((
                to_pixel((x * scale).round_ties_even()),
                to_pixel((y * scale).round_ties_even()),
            )),
            CoordinateSpace::ModelNormalized => {
                let (h_bar, w_bar) =
                    smart_resize(self.screen_height, self.screen_width, &self.resize)?;
                let (h_bar, w_bar) = (h_bar as f64, w_bar as f64);

                // Already-normalized input scales against the resized frame
                if (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y) {
                    return Ok((
                        to_pixel((x * w_bar).round_ties_even()),
                        to_pixel((y * h_bar).round_ties_even()),
                    ));
                }

                Ok((
                    to_pixel(x / w_bar * self.screen_width as f64),
                    to_pixel(y / h_bar * self.screen_height as f64),
                ))
            }
        }
    }
}

impl Projector {
    /// Rewrite the position arguments of every pointer call in `program`
    /// into screen pixels. Calls whose position is not a pair of numeric
    /// literals are left alone. Returns the number of calls rewritten.
    pub fn project_program(
        &self,
        program: &mut Program,
        scale: f64,
    ) -> Result<usize, ProjectionError> {
        let mut rewritten = 0;
        for stmt in &mut program.statements {
            let expr = match stmt {
                Stmt::Expr(expr) | Stmt::Assign { value: expr, .. } => expr,
                _ => continue,
            };
            if self.project_call(expr, scale)? {
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }

    fn project_call(&self, expr: &mut Expr, scale: f64) -> Result<bool, ProjectionError> {
        match expr.namespaced_call() {
            Some(("pyautogui", name)) if POINTER_CALLS.contains(&name) => {}
            _ => return Ok(false),
        }
        let Expr::Call { args, keywords, .. } = expr else {
            return Ok(false);
        };

        let x = position_arg(args, keywords, 0, "x");
        let y = position_arg(args, keywords, 1, "y");
        let (Some(x_expr), Some(y_expr)) = (x, y) else {
            return Ok(false);
        };
        let (Some(x), Some(y)) = (x_expr.as_number(), y_expr.as_number()) else {
            return Ok(false);
        };

        let (px, py) = self.project(x, y, scale)?;
        if let Some(slot) = position_arg_mut(args, keywords, 0, "x") {
            *slot = int_expr(px);
        }
        if let Some(slot) = position_arg_mut(args, keywords, 1, "y") {
            *slot = int_expr(py);
        }
        Ok(true)
    }
}

/// Pointer functions whose first two parameters are `x` and `y`.
const POINTER_CALLS: &[&str] = &[
    "click",
    "rightClick",
    "middleClick",
    "doubleClick",
    "tripleClick",
    "moveTo",
    "dragTo",
];

fn position_arg<'a>(
    args: &'a [Expr],
    keywords: &'a [Keyword],
    index: usize,
    name: &str,
) -> Option<&'a Expr> {
    keywords
        .iter()
        .find(|kw| kw.name == name)
        .map(|kw| &kw.value)
        .or_else(|| args.get(index))
}

fn position_arg_mut<'a>(
    args: &'a mut [Expr],
    keywords: &'a mut [Keyword],
    index: usize,
    name: &str,
) -> Option<&'a mut Expr> {
    match keywords.iter_mut().find(|kw| kw.name == name) {
        Some(kw) => Some(&mut kw.value),
        None => args.get_mut(index),
    }
}

fn int_expr(value: i32) -> Expr {
    if value < 0 {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(Expr::Int(-(value as i64))),
        }
    } else {
        Expr::Int(value as i64)
    }
}

/// Truncate toward zero, saturating at the `i32` range.
fn to_pixel(value: f64) -> i32 {
    value.trunc() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_projection() {
        let projector = Projector::new(CoordinateSpace::Relative, 1920, 1080).unwrap();
        assert_eq!(projector.project(0.5, 0.5, 1.0).unwrap(), (960, 540));
        assert_eq!(projector.project(0.0, 1.0, 1.0).unwrap(), (0, 1080));
    }

    #[test]
    fn test_absolute_projection_uses_scale() {
        let projector = Projector::new(CoordinateSpace::Absolute, 1920, 1080).unwrap();
        assert_eq!(projector.project(640.0, 360.0, 1.5).unwrap(), (960, 540));
        assert_eq!(projector.project(100.0, 100.0, 1.0).unwrap(), (100, 100));
    }

    #[test]
    fn test_smart_resize_aligns_to_factor() {
        let (h, w) = smart_resize(1080, 1920, &ResizeParams::default()).unwrap();
        assert_eq!(h % 28, 0);
        assert_eq!(w % 28, 0);
        assert_eq!((h, w), (1092, 1932));
    }

    #[test]
    fn test_smart_resize_caps_area() {
        let params = ResizeParams {
            max_pixels: 1_000_000,
            ..ResizeParams::default()
        };
        let (h, w) = smart_resize(2160, 3840, &params).unwrap();
        assert!((h as u64) * (w as u64) <= 1_000_000);
        assert_eq!(h % 28, 0);
        assert_eq!(w % 28, 0);
    }

    #[test]
    fn test_smart_resize_grows_small_images() {
        let (h, w) = smart_resize(30, 50, &ResizeParams::default()).unwrap();
        assert!((h as u64) * (w as u64) >= DEFAULT_MIN_PIXELS);
        assert_eq!((h, w), (56, 84));
    }

    #[test]
    fn test_smart_resize_rejects_tiny_input() {
        assert!(matches!(
            smart_resize(10, 1920, &ResizeParams::default()),
            Err(ProjectionError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_model_normalized_projection() {
        let projector = Projector::new(CoordinateSpace::ModelNormalized, 1920, 1080).unwrap();
        // Resized frame is 1932x1092
        assert_eq!(projector.project(966.0, 546.0, 1.0).unwrap(), (960, 540));
        // Fractions scale against the resized frame
        assert_eq!(projector.project(0.5, 0.5, 1.0).unwrap(), (966, 546));
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(Projector::new(CoordinateSpace::Relative, 0, 1080).is_err());
        let params = ResizeParams {
            factor: 0,
            ..ResizeParams::default()
        };
        assert_eq!(
            Projector::with_resize(CoordinateSpace::Relative, 1920, 1080, params),
            Err(ProjectionError::InvalidFactor)
        );
        let projector = Projector::new(CoordinateSpace::Relative, 1920, 1080).unwrap();
        assert!(projector.project(f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_project_program_rewrites_pointer_calls() {
        let projector = Projector::new(CoordinateSpace::Relative, 1920, 1080).unwrap();
        let mut program = crate::script::parse(
            "pyautogui.click(x=0.5, y=0.25)\npyautogui.moveTo(0.1, 0.1)\npyautogui.write('0.5')\npyautogui.scroll(-3)",
        )
        .unwrap();

        assert_eq!(projector.project_program(&mut program, 1.0).unwrap(), 2);
        assert_eq!(
            program.to_string(),
            "pyautogui.click(x=960, y=270)\npyautogui.moveTo(192, 108)\npyautogui.write('0.5')\npyautogui.scroll(-3)"
        );
    }

    #[test]
    fn test_project_program_skips_computed_positions() {
        let projector = Projector::new(CoordinateSpace::Absolute, 1920, 1080).unwrap();
        let mut program = crate::script::parse("pos = pyautogui.position()\npyautogui.click(pos[0], 10)").unwrap();
        assert_eq!(projector.project_program(&mut program, 2.0).unwrap(), 0);
    }

    #[test]
    fn test_space_parsing() {
        assert_eq!("qwen25".parse::<CoordinateSpace>().unwrap(), CoordinateSpace::ModelNormalized);
        let parsed: CoordinateSpace = serde_json::from_str("\"qwen25\"").unwrap();
        assert_eq!(parsed, CoordinateSpace::ModelNormalized);
        assert!("polar".parse::<CoordinateSpace>().is_err());
    }
}
