use crate::config::HoverConfig;
use crate::coordinator::ViewState;
use crate::types::Parish;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrokeStyle {
    pub color: String,
    pub width: f64,
}

/// Stroke of the two elements (region and bar) sharing one GEOID.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementStyles {
    pub region: StrokeStyle,
    pub bar: StrokeStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Label {
    pub geoid: String,
    pub name: String,
    pub text: String,
    pub x: f64,
    pub y: f64,
}

/// Pointer-driven highlight and floating label.
///
/// The base style of every element is captured once and restored verbatim
/// on leave. At most one entity is highlighted at a time.
pub struct HoverController {
    snapshots: HashMap<String, ElementStyles>,
    current: HashMap<String, ElementStyles>,
    highlight: StrokeStyle,
    label_size: (f64, f64),
    viewport: (f64, f64),
    active: Option<Label>,
}

impl HoverController {
    pub fn new(config: &HoverConfig, parishes: &[Parish], viewport: (f64, f64)) -> Self {
        let base = StrokeStyle {
            color: config.stroke_color.clone(),
            width: config.stroke_width,
        };
        let snapshots: HashMap<String, ElementStyles> = parishes
            .iter()
            .map(|p| {
                (
                    p.geoid.clone(),
                    ElementStyles {
                        region: base.clone(),
                        bar: base.clone(),
                    },
                )
            })
            .collect();

        Self {
            current: snapshots.clone(),
            snapshots,
            highlight: StrokeStyle {
                color: config.highlight_color.clone(),
                width: config.highlight_width,
            },
            label_size: (config.label_width, config.label_height),
            viewport,
            active: None,
        }
    }

    pub fn label(&self) -> Option<&Label> {
        self.active.as_ref()
    }

    /// Configured `(width, height)` of the label box.
    pub fn label_size(&self) -> (f64, f64) {
        self.label_size
    }

    pub fn style(&self, geoid: &str) -> Option<&ElementStyles> {
        self.current.get(geoid)
    }

    /// Highlight `geoid` in both views and show its label. Any entity
    /// already hovered is released first.
    pub fn enter(&mut self, geoid: &str, view: &ViewState) -> Option<&Label> {
        if let Some(previous) = self.active.as_ref().map(|l| l.geoid.clone()) {
            self.leave(&previous);
        }

        let bar = view.bar(geoid)?;
        let styles = self.current.get_mut(geoid)?;
        styles.region = self.highlight.clone();
        styles.bar = self.highlight.clone();

        let text = match bar.value {
            Some(v) => format!("{} {}", format_value(v), view.label),
            None => "No Data".to_string(),
        };

        self.active = Some(Label {
            geoid: geoid.to_string(),
            name: bar.name.clone(),
            text,
            x: 0.0,
            y: 0.0,
        });
        self.active.as_ref()
    }

    /// Reposition the label around the pointer, flipping to the left near
    /// the right edge and below the pointer near the top edge.
    pub fn move_to(&mut self, x: f64, y: f64) -> Option<&Label> {
        let (label_width, _) = self.label_size;
        let (viewport_width, _) = self.viewport;
        let label = self.active.as_mut()?;

        label.x = if x > viewport_width - label_width - 20.0 {
            x - label_width - 10.0
        } else {
            x + 10.0
        };
        label.y = if y < 75.0 { y + 25.0 } else { y - 75.0 };
        Some(&*label)
    }

    /// Restore the snapshot style of `geoid` and drop its label.
    pub fn leave(&mut self, geoid: &str) -> Option<&ElementStyles> {
        let snapshot = self.snapshots.get(geoid)?;
        self.current.insert(geoid.to_string(), snapshot.clone());
        if self.active.as_ref().is_some_and(|l| l.geoid == geoid) {
            self.active = None;
        }
        self.current.get(geoid)
    }
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::coordinator;

    fn controller() -> (HoverController, crate::coordinator::Coordinator) {
        let c = coordinator();
        let hover = HoverController::new(&HoverConfig::default(), c.parishes(), (1000.0, 700.0));
        (hover, c)
    }

    #[test]
    fn enter_highlights_both_elements_and_labels() {
        let (mut hover, c) = controller();
        let label = hover.enter("22003", c.view()).unwrap().clone();

        assert_eq!(label.name, "Parish 22003");
        assert_eq!(label.text, "40 v label");

        let styles = hover.style("22003").unwrap();
        assert_eq!(styles.region.color, "#1f78b4");
        assert_eq!(styles.bar.width, 2.0);
    }

    #[test]
    fn zero_value_reads_no_data() {
        let (mut hover, c) = controller();
        assert_eq!(hover.enter("22005", c.view()).unwrap().text, "No Data");
    }

    #[test]
    fn only_one_label_at_a_time() {
        let (mut hover, c) = controller();
        hover.enter("22001", c.view());
        hover.enter("22003", c.view());

        assert_eq!(hover.label().unwrap().geoid, "22003");
        // The first entity went back to its snapshot style
        let base = HoverConfig::default();
        assert_eq!(hover.style("22001").unwrap().region.color, base.stroke_color);
    }

    #[test]
    fn leave_restores_snapshot() {
        let (mut hover, c) = controller();
        let before = hover.style("22001").unwrap().clone();

        hover.enter("22001", c.view());
        assert_ne!(hover.style("22001").unwrap(), &before);

        hover.leave("22001");
        assert_eq!(hover.style("22001").unwrap(), &before);
        assert!(hover.label().is_none());
    }

    #[test]
    fn label_flips_near_edges() {
        let (mut hover, c) = controller();
        hover.enter("22001", c.view());

        let l = hover.move_to(100.0, 300.0).unwrap();
        assert_eq!((l.x, l.y), (110.0, 225.0));

        // Right edge: 1000 - 200 - 20 = 780
        let l = hover.move_to(900.0, 40.0).unwrap();
        assert_eq!((l.x, l.y), (690.0, 65.0));
    }

    #[test]
    fn unknown_geoid_and_idle_moves_are_ignored() {
        let (mut hover, c) = controller();
        assert!(hover.enter("99999", c.view()).is_none());
        assert!(hover.move_to(10.0, 10.0).is_none());
        assert!(hover.leave("99999").is_none());
    }
}
