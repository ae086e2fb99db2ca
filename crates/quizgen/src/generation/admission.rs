// Admission is the gate in front of the generation_jobs table.
// Nothing is written unless the request passes every check here; the
// single-flight check itself lives in the store (see GenerationRepo::insert_job).

use std::ops::RangeInclusive;

use crate::error::GenerationError;
use crate::generation::distribution::AreaWeights;
use crate::generation::model::{GenerationRequest, NewGenerationJob};

pub const COUNT_RANGE: RangeInclusive<i64> = 1..=500;
pub const DIFFICULTY_RANGE: RangeInclusive<i64> = 1..=5;

pub fn validate_count(count: i64) -> Result<u32, GenerationError> {
    if !COUNT_RANGE.contains(&count) {
        return Err(GenerationError::invalid(
            "count_out_of_range",
            format!(
                "count must be between {} and {}, got {count}",
                COUNT_RANGE.start(),
                COUNT_RANGE.end()
            ),
        ));
    }
    Ok(count as u32)
}

/// `None` resolves to every known area; an explicit list must be non-empty
/// and known. Order of first appearance is kept, repeats collapse.
pub fn resolve_areas(
    selected: Option<Vec<String>>,
    weights: &AreaWeights,
) -> Result<Vec<String>, GenerationError> {
    let Some(selected) = selected else {
        return Ok(weights.areas());
    };

    if selected.is_empty() {
        return Err(GenerationError::invalid(
            "empty_areas",
            "selected_areas must not be empty",
        ));
    }

    let mut out: Vec<String> = Vec::with_capacity(selected.len());
    for area in selected {
        let area = area.trim().to_string();
        if !weights.contains(&area) {
            return Err(GenerationError::invalid(
                "unknown_area",
                format!("unknown content area '{area}'"),
            ));
        }
        if !out.contains(&area) {
            out.push(area);
        }
    }
    Ok(out)
}

pub fn validate_difficulty(difficulty: Option<i64>) -> Result<Option<i64>, GenerationError> {
    match difficulty {
        Some(d) if !DIFFICULTY_RANGE.contains(&d) => Err(GenerationError::invalid(
            "difficulty_out_of_range",
            format!(
                "difficulty_min must be between {} and {}, got {d}",
                DIFFICULTY_RANGE.start(),
                DIFFICULTY_RANGE.end()
            ),
        )),
        other => Ok(other),
    }
}

pub fn validate_request(
    req: GenerationRequest,
    weights: &AreaWeights,
    created_by: i64,
) -> Result<NewGenerationJob, GenerationError> {
    let requested_count = validate_count(req.count)?;
    let selected_areas = resolve_areas(req.selected_areas, weights)?;
    let difficulty_min = validate_difficulty(req.difficulty_min)?;

    Ok(NewGenerationJob {
        requested_count,
        skip_dedup: req.skip_dedup,
        selected_areas,
        difficulty_min,
        created_by,
    })
}
