use inkmark_contracts::session::{MarkerColor, MaskInstruction};

pub const EDIT_TEMPLATE: &str = "You are editing an image. Two images are attached.\n\
IMAGE 1 is the original source image.\n\
IMAGE 2 is the same image with colored marker annotations drawn on top of it.\n\
The colored markings in IMAGE 2 are location metadata only. They show where each \
instruction applies. They are not part of the scene and must never be reproduced, \
traced, or reinterpreted as objects, outlines, or paint.\n\
Produce your result from IMAGE 1, the source image. Do not start from IMAGE 2, the \
annotated overlay image.\n\
The output must not contain any trace of the marker colors ({palette}). Remove every \
marker line completely.\n\
Leave everything outside the marked regions unchanged unless the global instruction \
says otherwise.";

pub const GLOBAL_FALLBACK: &str =
    "No global change was requested; apply only the region instructions below.";

pub const REGION_FALLBACK: &str =
    "No regions were annotated; apply the global instruction to the whole image.";

pub const DETECTION_PROMPT: &str = "Inspect this image for leftover annotation artifacts: \
hand-drawn marker strokes, scribbles, or outlines in saturated red, green, blue, yellow, \
cyan, or magenta that are not a natural part of the scene. Answer with JSON only, in the \
form {\"hasArtifacts\": true} or {\"hasArtifacts\": false}.";

pub const CLEANUP_PROMPT: &str = "This image still contains colored marker lines that were \
drawn on it as annotations (saturated red, green, blue, yellow, cyan, or magenta strokes). \
Remove every one of those marker lines and inpaint the areas underneath so they blend \
seamlessly with the surrounding content. Do not change anything else in the image.";

fn palette_description() -> String {
    MarkerColor::ALL
        .iter()
        .map(|color| format!("{} {}", color.label().to_ascii_lowercase(), color.hex()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Text part of a masked edit request. Deterministic for equal inputs.
pub fn build_edit_prompt(regions: &[MaskInstruction], global_instruction: &str) -> String {
    let template = EDIT_TEMPLATE.replace("{palette}", &palette_description());
    let global = match global_instruction.trim() {
        "" => GLOBAL_FALLBACK,
        text => text,
    };
    let region_lines = if regions.is_empty() {
        REGION_FALLBACK.to_string()
    } else {
        regions
            .iter()
            .map(MaskInstruction::prompt_line)
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("{template}\n\nGLOBAL INSTRUCTION: {global}\n\nREGION INSTRUCTIONS:\n{region_lines}")
}
