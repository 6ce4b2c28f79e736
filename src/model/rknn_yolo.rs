// 该文件是 Kuijia （盔甲） 项目的一部分。
// src/model/rknn_yolo.rs - RKNPU 上的 YOLO 检测模型
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

use std::{path::PathBuf, sync::Mutex};

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{
    DetectItem, DetectResult, Model, ModelError,
    letterbox::Letterbox,
    model_path_from_url,
    postprocess::CANDIDATE_SCORE_FLOOR,
  },
};

const RKNN_YOLO_NUM_INPUTS: u32 = 1;
const RKNN_YOLO_NUM_OUTPUTS: u32 = 6;
const RKNN_YOLO_INPUT_SIZE: u32 = 640;
const RKNN_YOLO_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const RKNN_YOLO_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

/// 三个检测头、每头输出回归与分类两个张量的无 NMS 导出模型
///
/// RKNN 上下文不保证可并发调用，推理时加锁。
pub struct RknnYolo {
  context: Mutex<Context>,
  num_classes: usize,
  score_floor: f32,
}

pub struct RknnYoloBuilder {
  model_path: PathBuf,
  flags: InitFlags,
  num_classes: usize,
}

impl FromUrlWithScheme for RknnYoloBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnYoloBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(RknnYoloBuilder {
      model_path: model_path_from_url(url)?,
      flags: InitFlags::default(),
      num_classes: 0,
    })
  }
}

impl RknnYoloBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn build(self) -> Result<RknnYolo, ModelError> {
    if !self.model_path.is_file() {
      return Err(ModelError::NotFound(self.model_path));
    }
    if self.num_classes == 0 {
      return Err(ModelError::InvalidParameter("类别数不能为 0".to_string()));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)
      .map_err(|e| ModelError::Load(format!("{}: {}", self.model_path.display(), e)))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != RKNN_YOLO_NUM_INPUTS || num_outputs != RKNN_YOLO_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_YOLO_NUM_INPUTS, RKNN_YOLO_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(ModelError::Load(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_YOLO_NUM_INPUTS, RKNN_YOLO_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }
    info!("模型加载完成, 类别数 {}", self.num_classes);

    Ok(RknnYolo {
      context: Mutex::new(context),
      num_classes: self.num_classes,
      score_floor: CANDIDATE_SCORE_FLOOR,
    })
  }
}

/// 根据张量大小匹配回归和分类输出
/// 返回 (reg, cls) 元组，如果大小不匹配则返回 None
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

impl RknnYolo {
  fn postprocess(&self, output: &rknpu::Output, letterbox: &Letterbox) -> Vec<DetectItem> {
    let mut items = Vec::new();
    let input_size = RKNN_YOLO_INPUT_SIZE as f32;

    for (head_idx, (&(map_h, map_w), stride)) in RKNN_YOLO_HEAD_SIZES
      .iter()
      .zip(RKNN_YOLO_STRIDES)
      .enumerate()
    {
      let spatial = map_h * map_w;
      let reg_expected = 4 * spatial;
      let cls_expected = self.num_classes * spatial;

      // RKNN 输出顺序可能不同，需要根据张量大小判断回归与分类
      let (tensor1, tensor2) = match (
        output.get_f32(head_idx * 2),
        output.get_f32(head_idx * 2 + 1),
      ) {
        (Ok(t1), Ok(t2)) => (t1, t2),
        (Err(e), _) | (_, Err(e)) => {
          error!("获取检测头 {} 的输出失败: {}", head_idx, e);
          continue;
        }
      };

      let Some((reg, cls)) = match_reg_cls_tensors(tensor1, tensor2, reg_expected, cls_expected)
      else {
        error!(
          "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
          head_idx,
          tensor1.len(),
          tensor2.len(),
          reg_expected,
          cls_expected
        );
        continue;
      };

      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (score, class_id) = {
            let mut max_logit = f32::MIN;
            let mut cls_idx = 0usize;
            for c in 0..self.num_classes {
              let logit = cls[c * spatial + idx];
              if logit > max_logit {
                max_logit = logit;
                cls_idx = c;
              }
            }
            (sigmoid(max_logit), cls_idx as u32)
          };

          if score < self.score_floor {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;
          let bbox = [
            ((grid_x - reg[idx]) * stride).clamp(0.0, input_size),
            ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_size),
            ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_size),
            ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_size),
          ];

          items.push(DetectItem {
            class_id,
            score,
            bbox: letterbox.to_normalized_bbox(bbox),
          });
        }
      }
    }

    items
  }
}

impl Model for RknnYolo {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let letterbox = Letterbox::new(input.width(), input.height(), RKNN_YOLO_INPUT_SIZE);
    let canvas = letterbox.apply(&input.to_rgb_image());

    let context = self
      .context
      .lock()
      .map_err(|_| ModelError::Inference("RKNN 上下文锁已损坏".to_string()))?;

    debug!("设置模型输入");
    context.set_input(0, canvas.as_raw(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    context.run()?;

    let output = context.get_outputs()?;
    let items = self.postprocess(&output, &letterbox);
    debug!("检测到 {} 个候选框", items.len());

    Ok(DetectResult::from(items))
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
