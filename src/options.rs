//! Engine options accepted by every segmentation endpoint.
//!
//! The same flat schema arrives as JSON (`/segment_url`, `/segment_input`) or
//! as string-valued multipart fields (`/segment_file`) and is finally rendered
//! into command line flags for the engine.

use serde::{Deserialize, Serialize};

use crate::error::{SegmentError, SegmentResult};

/// Task names the engine knows about. `task` itself is not validated against
/// this list; it drives `fetch-weights`.
pub const KNOWN_TASKS: &[&str] = &[
    "total",
    "body",
    "lung_vessels",
    "cerebral_bleed",
    "hip_implant",
    "coronary_arteries",
    "pleural_pericard_effusion",
    "test",
    "appendicular_bones",
    "tissue_types",
    "heartchambers_highres",
    "face",
    "vertebrae_body",
    "total_mr",
    "tissue_types_mr",
    "face_mr",
    "head_glands_cavities",
    "head_muscles",
    "headneck_bones_vessels",
    "headneck_muscles",
    "brain_structures",
    "liver_vessels",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Nifti,
    Dicom,
}

impl OutputType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::Nifti => "nifti",
            OutputType::Dicom => "dicom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentOptions {
    /// Save one multilabel image for all classes.
    pub ml: bool,
    pub nr_thr_resamp: u32,
    pub nr_thr_saving: u32,
    /// 3mm model.
    pub fast: bool,
    pub nora_tag: String,
    pub preview: bool,
    pub task: String,
    /// Space separated class names.
    pub roi_subset: Option<String>,
    pub statistics: bool,
    pub radiomics: bool,
    pub crop_path: Option<String>,
    pub body_seg: bool,
    pub force_split: bool,
    pub output_type: OutputType,
    pub quiet: bool,
    pub verbose: bool,
    pub test: u8,
    pub skip_saving: bool,
    pub device: String,
    pub license_number: Option<String>,
    pub statistics_exclude_masks_at_border: bool,
    pub no_derived_masks: bool,
    pub v1_order: bool,
    /// 6mm model.
    pub fastest: bool,
    pub roi_subset_robust: Option<String>,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            ml: true,
            nr_thr_resamp: 1,
            nr_thr_saving: 6,
            fast: false,
            nora_tag: "None".to_string(),
            preview: false,
            task: "total".to_string(),
            roi_subset: None,
            statistics: false,
            radiomics: false,
            crop_path: None,
            body_seg: false,
            force_split: false,
            output_type: OutputType::Nifti,
            quiet: false,
            verbose: false,
            test: 0,
            skip_saving: false,
            device: "gpu".to_string(),
            license_number: None,
            statistics_exclude_masks_at_border: true,
            no_derived_masks: false,
            v1_order: false,
            fastest: false,
            roi_subset_robust: None,
        }
    }
}

impl SegmentOptions {
    /// Apply one string-valued form field. Unknown names are ignored.
    pub fn set_field(&mut self, name: &str, value: &str) -> SegmentResult<()> {
        match name {
            "ml" => self.ml = parse_flag(name, value)?,
            "nr_thr_resamp" => self.nr_thr_resamp = parse_number(name, value)?,
            "nr_thr_saving" => self.nr_thr_saving = parse_number(name, value)?,
            "fast" => self.fast = parse_flag(name, value)?,
            "nora_tag" => self.nora_tag = value.to_string(),
            "preview" => self.preview = parse_flag(name, value)?,
            "task" => self.task = value.to_string(),
            "roi_subset" => self.roi_subset = non_empty(value),
            "statistics" => self.statistics = parse_flag(name, value)?,
            "radiomics" => self.radiomics = parse_flag(name, value)?,
            "crop_path" => self.crop_path = non_empty(value),
            "body_seg" => self.body_seg = parse_flag(name, value)?,
            "force_split" => self.force_split = parse_flag(name, value)?,
            "output_type" => {
                self.output_type = match value.trim().to_ascii_lowercase().as_str() {
                    "nifti" => OutputType::Nifti,
                    "dicom" => OutputType::Dicom,
                    _ => {
                        return Err(SegmentError::BadRequest(format!(
                            "field `output_type` expects nifti or dicom, got {value:?}"
                        )));
                    }
                }
            }
            "quiet" => self.quiet = parse_flag(name, value)?,
            "verbose" => self.verbose = parse_flag(name, value)?,
            "test" => self.test = parse_number(name, value)?,
            "skip_saving" => self.skip_saving = parse_flag(name, value)?,
            "device" => self.device = value.to_string(),
            "license_number" => self.license_number = non_empty(value),
            "statistics_exclude_masks_at_border" => {
                self.statistics_exclude_masks_at_border = parse_flag(name, value)?
            }
            "no_derived_masks" => self.no_derived_masks = parse_flag(name, value)?,
            "v1_order" => self.v1_order = parse_flag(name, value)?,
            "fastest" => self.fastest = parse_flag(name, value)?,
            "roi_subset_robust" => self.roi_subset_robust = non_empty(value),
            _ => tracing::debug!(field = name, "ignoring unknown form field"),
        }
        Ok(())
    }

    /// Options for endpoints that hand back one label volume.
    ///
    /// Without `--ml` the engine writes one mask per class into a directory,
    /// so `ml` is forced on.
    pub fn single_file_output(mut self) -> Self {
        if !self.ml {
            tracing::debug!("ml=false ignored, this endpoint returns a single file");
        }
        self.ml = true;
        self
    }

    /// Render the options as engine command line flags, in schema order.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.ml {
            args.push("--ml".to_string());
        }
        args.extend(["--nr_thr_resamp".to_string(), self.nr_thr_resamp.to_string()]);
        args.extend(["--nr_thr_saving".to_string(), self.nr_thr_saving.to_string()]);
        if self.fast {
            args.push("--fast".to_string());
        }
        args.extend(["--nora_tag".to_string(), self.nora_tag.clone()]);
        if self.preview {
            args.push("--preview".to_string());
        }
        args.extend(["--task".to_string(), self.task.clone()]);
        push_list(&mut args, "--roi_subset", self.roi_subset.as_deref());

        let switches = [
            (self.statistics, "--statistics"),
            (self.radiomics, "--radiomics"),
        ];
        push_switches(&mut args, &switches);
        if let Some(crop_path) = &self.crop_path {
            args.extend(["--crop_path".to_string(), crop_path.clone()]);
        }
        let switches = [
            (self.body_seg, "--body_seg"),
            (self.force_split, "--force_split"),
        ];
        push_switches(&mut args, &switches);
        args.extend([
            "--output_type".to_string(),
            self.output_type.as_str().to_string(),
        ]);
        let switches = [(self.quiet, "--quiet"), (self.verbose, "--verbose")];
        push_switches(&mut args, &switches);
        if self.test != 0 {
            args.extend(["--test".to_string(), self.test.to_string()]);
        }
        if self.skip_saving {
            args.push("--skip_saving".to_string());
        }
        args.extend(["--device".to_string(), self.device.clone()]);
        if let Some(license) = &self.license_number {
            args.extend(["--license_number".to_string(), license.clone()]);
        }
        let switches = [
            (
                !self.statistics_exclude_masks_at_border,
                "--stats_include_incomplete",
            ),
            (self.no_derived_masks, "--no_derived_masks"),
            (self.v1_order, "--v1_order"),
            (self.fastest, "--fastest"),
        ];
        push_switches(&mut args, &switches);
        push_list(
            &mut args,
            "--roi_subset_robust",
            self.roi_subset_robust.as_deref(),
        );
        args
    }
}

fn push_switches(args: &mut Vec<String>, switches: &[(bool, &str)]) {
    args.extend(
        switches
            .iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, name)| (*name).to_string()),
    );
}

fn push_list(args: &mut Vec<String>, name: &str, value: Option<&str>) {
    let Some(value) = value else { return };
    let items: Vec<&str> = value.split_whitespace().collect();
    if items.is_empty() {
        return;
    }
    args.push(name.to_string());
    args.extend(items.into_iter().map(str::to_string));
}

fn parse_flag(name: &str, value: &str) -> SegmentResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SegmentError::BadRequest(format!(
            "field `{name}` expects a boolean, got {value:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> SegmentResult<T> {
    value.trim().parse().map_err(|_| {
        SegmentError::BadRequest(format!("field `{name}` expects an integer, got {value:?}"))
    })
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_to_engine_flags() {
        let args = SegmentOptions::default().to_cli_args();
        assert_eq!(
            args,
            vec![
                "--ml",
                "--nr_thr_resamp",
                "1",
                "--nr_thr_saving",
                "6",
                "--nora_tag",
                "None",
                "--task",
                "total",
                "--output_type",
                "nifti",
                "--device",
                "gpu",
            ]
        );
    }

    #[test]
    fn empty_json_yields_defaults() {
        let options: SegmentOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, SegmentOptions::default());
    }

    #[test]
    fn partial_json_overrides_only_given_fields() {
        let options: SegmentOptions =
            serde_json::from_str(r#"{"fast": true, "device": "cpu", "output_type": "dicom"}"#)
                .unwrap();
        assert!(options.fast);
        assert_eq!(options.device, "cpu");
        assert_eq!(options.output_type, OutputType::Dicom);
        assert_eq!(options.task, "total");
        assert!(options.ml);
    }

    #[test]
    fn roi_lists_expand_to_separate_arguments() {
        let options = SegmentOptions {
            roi_subset: Some("liver  spleen kidney_left".to_string()),
            statistics_exclude_masks_at_border: false,
            test: 3,
            ..SegmentOptions::default()
        };
        let args = options.to_cli_args();
        let roi = args.iter().position(|a| a == "--roi_subset").unwrap();
        assert_eq!(&args[roi + 1..roi + 4], ["liver", "spleen", "kidney_left"]);
        assert!(args.contains(&"--stats_include_incomplete".to_string()));
        let test = args.iter().position(|a| a == "--test").unwrap();
        assert_eq!(args[test + 1], "3");
    }

    #[test]
    fn form_fields_parse_loosely() {
        let mut options = SegmentOptions::default();
        options.set_field("ml", "False").unwrap();
        options.set_field("fastest", "on").unwrap();
        options.set_field("nr_thr_saving", " 2 ").unwrap();
        options.set_field("roi_subset", "").unwrap();
        options.set_field("unrelated", "whatever").unwrap();
        assert!(!options.ml);
        assert!(options.fastest);
        assert_eq!(options.nr_thr_saving, 2);
        assert_eq!(options.roi_subset, None);
    }

    #[test]
    fn single_file_output_forces_multilabel() {
        let options = SegmentOptions {
            ml: false,
            fast: true,
            ..SegmentOptions::default()
        }
        .single_file_output();
        assert!(options.ml);
        assert!(options.fast);
        assert_eq!(options.to_cli_args()[0], "--ml");
    }

    #[test]
    fn malformed_form_values_are_rejected() {
        let mut options = SegmentOptions::default();
        let err = options.set_field("preview", "maybe").unwrap_err();
        assert!(matches!(err, SegmentError::BadRequest(_)));
        assert!(options.set_field("nr_thr_resamp", "-1").is_err());
        assert!(options.set_field("output_type", "png").is_err());
    }
}
