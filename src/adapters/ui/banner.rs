//! Startup banner: "CREDITOPS" in figlet letters with a vertical colour gradient.

use crossterm::ExecutableCommand;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use figlet_rs::FIGfont;
use std::io::{Write, stdout};

const TITLE: &str = "CREDITOPS";

/// Amber (#ffb000).
const AMBER: (u8, u8, u8) = (0xff, 0xb0, 0x00);
/// Teal (#00c2a8).
const TEAL: (u8, u8, u8) = (0x00, 0xc2, 0xa8);

/// Linear interpolation between two RGB colors. `t` in [0.0, 1.0].
fn lerp_rgb(a: (u8, u8, u8), b: (u8, u8, u8), t: f64) -> (u8, u8, u8) {
    let mix = |x: u8, y: u8| (f64::from(x) * (1.0 - t) + f64::from(y) * t).round() as u8;
    (mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Figlet rendering of the title, or the plain title when the font is unavailable.
fn render_title() -> String {
    FIGfont::standard()
        .ok()
        .and_then(|font| font.convert(TITLE).map(|figure| figure.to_string()))
        .unwrap_or_else(|| format!("{}\n", TITLE))
}

pub fn print_welcome() {
    let mut out = stdout();
    let art = render_title();
    let lines: Vec<&str> = art.lines().collect();
    let last = lines.len().saturating_sub(1).max(1);

    for (i, line) in lines.iter().enumerate() {
        let (r, g, b) = lerp_rgb(AMBER, TEAL, i as f64 / last as f64);
        let _ = out.execute(SetForegroundColor(Color::Rgb { r, g, b }));
        let _ = out.execute(Print(line));
        let _ = out.execute(Print("\r\n"));
        let _ = out.execute(ResetColor);
    }

    let _ = out.execute(SetForegroundColor(Color::Rgb {
        r: TEAL.0,
        g: TEAL.1,
        b: TEAL.2,
    }));
    let _ = out.execute(Print(format!(
        "v{}  credits · memberships · operations · oauth\r\n",
        env!("CARGO_PKG_VERSION")
    )));
    let _ = out.execute(ResetColor);
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_endpoints() {
        assert_eq!(lerp_rgb(AMBER, TEAL, 0.0), AMBER);
        assert_eq!(lerp_rgb(AMBER, TEAL, 1.0), TEAL);
    }

    #[test]
    fn test_title_renders() {
        assert!(!render_title().trim().is_empty());
    }
}
