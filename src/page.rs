// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/page.rs - 上传页面渲染
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fmt::Write;

use crate::{
  compliance::{ComplianceVerdict, RequiredEquipment},
  detection::RenderedMedia,
  input::{MediaKind, SUPPORTED_EXTENSIONS},
  label::join_labels,
  provider::ConfidenceThreshold,
  task::{Inspection, InspectionOutcome},
};

pub const PAGE_TITLE: &str = "Smart Safety Gear Detection System";

const STYLE: &str = r#"
body { margin: 0; background-color: #f8fafc; font-family: "Segoe UI", sans-serif; color: #1f2937; }
main { max-width: 1100px; margin: 0 auto; padding: 2rem 1.5rem; }
h1, h2, h3 { color: #2b2d42; }
.layout { display: grid; grid-template-columns: 280px 1fr; gap: 2rem; }
.settings { background: #ffffff; border-radius: 10px; padding: 1rem 1.25rem; box-shadow: 0 1px 3px rgba(0,0,0,.08); }
.settings output { font-weight: 600; }
button { background-color: #2563eb; color: white; border: none; border-radius: 10px; padding: 0.6rem 1.2rem; font-weight: 600; transition: 0.3s; cursor: pointer; }
button:hover { background-color: #1e40af; }
.media img, .media video { max-width: 100%; border-radius: 10px; }
.columns { display: grid; grid-template-columns: 1fr 1fr; gap: 1.5rem; }
.alert { border-radius: 10px; padding: 0.9rem 1.1rem; margin: 0.6rem 0; }
.success { background: #dcfce7; color: #166534; }
.danger { background: #fee2e2; color: #991b1b; }
.warning { background: #fef9c3; color: #854d0e; }
.info { background: #dbeafe; color: #1e40af; }
.error-panel { border: 2px solid #b91c1c; background: #fff1f2; color: #7f1d1d; border-radius: 10px; padding: 1rem 1.25rem; }
.footer { text-align: center; margin-top: 2rem; font-size: 0.9rem; color: #6b7280; }
"#;

/// 页面主体要展示的内容
pub enum PageView<'a> {
  /// 尚未上传
  Empty,
  Outcome(&'a InspectionOutcome),
  /// 请求本身无效（缺少文件、阈值越界等）
  Rejected(&'a str),
  /// 模型在启动时加载失败
  Unavailable(&'a str),
}

pub struct Page<'a> {
  pub threshold: ConfidenceThreshold,
  pub required: &'a RequiredEquipment,
  pub view: PageView<'a>,
}

pub fn escape_html(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      _ => escaped.push(c),
    }
  }
  escaped
}

pub fn media_url(file_name: &str) -> String {
  format!("/media/{}", urlencoding::encode(file_name))
}

impl Page<'_> {
  pub fn render(&self) -> String {
    let mut html = String::new();
    let _ = write!(
      html,
      "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
       <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
       <title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n<main>\n\
       <h1>🦺 {title}</h1>\n\
       <p>A real-time AI-powered system to verify if workers are wearing safety equipment like helmets and vests.</p>\n",
      title = PAGE_TITLE,
      style = STYLE,
    );

    match &self.view {
      PageView::Unavailable(reason) => {
        let _ = write!(
          html,
          "<div class=\"error-panel\" id=\"startup-error\">❌ Model could not be loaded: <code>{}</code></div>\n",
          escape_html(reason)
        );
      }
      view => {
        html.push_str("<div class=\"layout\">\n");
        self.render_settings(&mut html);
        html.push_str("<section>\n");
        self.render_upload(&mut html);
        match view {
          PageView::Outcome(InspectionOutcome::Completed(inspection)) => {
            render_inspection(&mut html, inspection)
          }
          PageView::Outcome(InspectionOutcome::Failed { kind, message }) => {
            render_error_panel(&mut html, &format!("Analysis failed ({}): {}", kind, message))
          }
          PageView::Rejected(reason) => render_error_panel(&mut html, reason),
          _ => {}
        }
        html.push_str("</section>\n</div>\n");
      }
    }

    html.push_str(
      "<div class=\"footer\">© 2026 Kuijia Safety Gear Detection | YOLO detection</div>\n</main>\n</body>\n</html>\n",
    );
    html
  }

  fn render_settings(&self, html: &mut String) {
    let required = join_labels(self.required.labels()).unwrap_or_else(|| "None".to_string());
    let _ = write!(
      html,
      "<aside class=\"settings\">\n<h2>⚙️ Settings</h2>\n\
       <label for=\"confidence\">Confidence Threshold: <output id=\"confidence-value\">{value}</output></label>\n\
       <input form=\"upload\" type=\"range\" id=\"confidence\" name=\"confidence\" min=\"{min}\" max=\"{max}\" step=\"{step}\" value=\"{value}\" \
       oninput=\"document.getElementById('confidence-value').value = Number(this.value).toFixed(2)\">\n\
       <hr>\n<p>Required gear: <strong>{required}</strong></p>\n</aside>\n",
      value = self.threshold,
      min = ConfidenceThreshold::MIN,
      max = ConfidenceThreshold::MAX,
      step = ConfidenceThreshold::STEP,
      required = escape_html(&required),
    );
  }

  fn render_upload(&self, html: &mut String) {
    let accept = SUPPORTED_EXTENSIONS
      .iter()
      .map(|ext| format!(".{}", ext))
      .collect::<Vec<_>>()
      .join(",");
    let _ = write!(
      html,
      "<h3>📤 Upload an image or video</h3>\n\
       <form id=\"upload\" method=\"post\" action=\"/inspect\" enctype=\"multipart/form-data\">\n\
       <input type=\"file\" name=\"file\" accept=\"{accept}\" required>\n\
       <button type=\"submit\">Analyze</button>\n</form>\n",
    );
  }
}

fn render_media(html: &mut String, media: &RenderedMedia) {
  let Some(name) = media.file_name() else {
    return;
  };
  let url = escape_html(&media_url(name));
  html.push_str("<div class=\"media\">\n");
  let _ = match media.kind {
    MediaKind::Image => write!(
      html,
      "<img src=\"{}\" alt=\"Detection Output\">\n<p>🖼️ Detection Output</p>\n",
      url
    ),
    MediaKind::Video => write!(
      html,
      "<video src=\"{}\" controls></video>\n<p>🎞️ Detection Output</p>\n",
      url
    ),
  };
  html.push_str("</div>\n");
}

fn render_verdict(html: &mut String, verdict: &ComplianceVerdict) {
  if verdict.is_safe() {
    html.push_str(
      "<h3 id=\"status\">🟢 Status: SAFE</h3>\n\
       <div class=\"alert success\">All required safety gear detected!</div>\n",
    );
  } else {
    let missing = join_labels(verdict.missing_labels()).unwrap_or_default();
    let _ = write!(
      html,
      "<h3 id=\"status\">🔴 Status: UNSAFE</h3>\n\
       <div class=\"alert danger\">Missing: {}</div>\n\
       <div class=\"alert warning\">Please ensure proper safety gear is worn before entering the site.</div>\n",
      escape_html(&missing)
    );
  }
}

fn render_inspection(html: &mut String, inspection: &Inspection) {
  match &inspection.detection.rendered {
    Some(media) => render_media(html, media),
    None => html.push_str("<div class=\"alert info\">No annotated output was produced.</div>\n"),
  }

  let detected =
    join_labels(inspection.verdict.detected_labels()).unwrap_or_else(|| "None".to_string());
  let _ = write!(
    html,
    "<h3>🧾 Detection Summary</h3>\n<div class=\"columns\">\n\
     <div><div class=\"alert success\" id=\"detected\">✅ Detected Objects: {}</div>\n\
     <p>{} frame(s) analysed in {} ms at threshold {}</p></div>\n<div>\n",
    escape_html(&detected),
    inspection.detection.frames,
    inspection.elapsed_ms,
    inspection.threshold,
  );
  render_verdict(html, &inspection.verdict);
  html.push_str("</div>\n</div>\n");
}

fn render_error_panel(html: &mut String, message: &str) {
  let _ = write!(
    html,
    "<div class=\"error-panel\" id=\"error\">⚠️ {}</div>\n",
    escape_html(message)
  );
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use crate::{
    compliance::evaluate,
    detection::DetectionResult,
    label::label_set,
    provider::ErrorKind,
  };

  fn completed(detected: &[&str], rendered: Option<RenderedMedia>) -> InspectionOutcome {
    let required = RequiredEquipment::default();
    InspectionOutcome::Completed(Inspection {
      detection: DetectionResult {
        objects: vec![],
        rendered,
        frames: 1,
      },
      verdict: evaluate(&label_set(detected).unwrap(), required.labels()),
      threshold: ConfidenceThreshold::default(),
      elapsed_ms: 12,
    })
  }

  fn render(view: PageView<'_>) -> String {
    let required = RequiredEquipment::default();
    Page {
      threshold: ConfidenceThreshold::default(),
      required: &required,
      view,
    }
    .render()
  }

  #[test]
  fn escapes_markup() {
    assert_eq!(
      escape_html("<a href=\"x\">'&'</a>"),
      "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
    );
  }

  #[test]
  fn empty_page_has_form_and_slider() {
    let html = render(PageView::Empty);
    assert!(html.contains(PAGE_TITLE));
    let accept = if cfg!(feature = "gstreamer_input") {
      "accept=\".jpg,.jpeg,.png,.mp4\""
    } else {
      "accept=\".jpg,.jpeg,.png\""
    };
    assert!(html.contains(accept));
    assert!(html.contains("min=\"0.2\" max=\"1\" step=\"0.05\" value=\"0.50\""));
    assert!(!html.contains("Status:"));
    assert!(!html.contains("error-panel"));
  }

  #[test]
  fn safe_outcome_shows_media_and_summary() {
    let media = RenderedMedia {
      path: PathBuf::from("/srv/out/20260101-0001-site a.png"),
      kind: MediaKind::Image,
    };
    let outcome = completed(&["helmet", "vest", "person"], Some(media));
    let html = render(PageView::Outcome(&outcome));
    assert!(html.contains("src=\"/media/20260101-0001-site%20a.png\""));
    assert!(html.contains("Detected Objects: helmet, person, vest"));
    assert!(html.contains("Status: SAFE"));
    assert!(html.contains("All required safety gear detected!"));
  }

  #[test]
  fn unsafe_outcome_lists_missing_gear() {
    let outcome = completed(&[], None);
    let html = render(PageView::Outcome(&outcome));
    assert!(html.contains("Detected Objects: None"));
    assert!(html.contains("Status: UNSAFE"));
    assert!(html.contains("Missing: helmet, vest"));
    assert!(html.contains("Please ensure proper safety gear is worn"));
  }

  #[test]
  fn video_outcome_uses_video_tag() {
    let media = RenderedMedia {
      path: PathBuf::from("/srv/out/clip.mp4"),
      kind: MediaKind::Video,
    };
    let outcome = completed(&["helmet"], Some(media));
    let html = render(PageView::Outcome(&outcome));
    assert!(html.contains("<video src=\"/media/clip.mp4\" controls>"));
  }

  #[test]
  fn failures_render_an_error_panel_not_a_verdict() {
    let outcome = InspectionOutcome::Failed {
      kind: ErrorKind::Decode,
      message: "<bad> file".to_string(),
    };
    let html = render(PageView::Outcome(&outcome));
    assert!(html.contains("id=\"error\""));
    assert!(html.contains("Analysis failed (decode): &lt;bad&gt; file"));
    assert!(!html.contains("Status:"));
  }

  #[test]
  fn startup_failure_hides_the_form() {
    let html = render(PageView::Unavailable("model not found: /m.onnx"));
    assert!(html.contains("id=\"startup-error\""));
    assert!(html.contains("model not found: /m.onnx"));
    assert!(!html.contains("<form"));
  }
}
