//! Matrix expansion: templates to an ordered list of concrete job specs.

use crate::error::MatrixResult;
use crate::fingerprint::{fingerprint, EnvironmentInputs};
use crate::job::{JobSpec, ShardSlot};
use crate::matrix::Matrix;
use std::collections::BTreeMap;
use tracing::debug;

/// Expand a matrix into concrete job specs.
///
/// `base_inputs` are the run-level environment inputs (base layer revision,
/// install script digests); each combination's `axis=value` pairs are appended
/// to them, in axis-name order, to derive the job's environment fingerprint.
///
/// Emission order: template declaration order, then lexicographic axis-name
/// order within each template's Cartesian product, then ascending shard
/// index. The order matters for log readability and parallel-slot assignment
/// only.
///
/// A template whose axis selections intersect to zero values yields zero
/// specs; this is a supported skip, not an error.
pub fn expand(matrix: &Matrix, base_inputs: &EnvironmentInputs) -> MatrixResult<Vec<JobSpec>> {
    matrix.validate()?;

    let mut specs = Vec::new();

    for template in &matrix.templates {
        // BTreeMap iteration gives the lexicographic axis order.
        let axes: Vec<(&str, Vec<&str>)> = template
            .axes
            .iter()
            .map(|(name, selection)| {
                let axis = matrix.axis(name).expect("validated above");
                (name.as_str(), selection.resolve(axis))
            })
            .collect();

        if axes.iter().any(|(_, values)| values.is_empty()) {
            debug!(template = %template.name, "template matches no axis values, skipping");
            continue;
        }

        // Odometer over the per-axis value lists; rightmost axis varies fastest.
        let mut indices = vec![0usize; axes.len()];
        let mut exhausted = false;
        while !exhausted {
            let axis_values: BTreeMap<String, String> = axes
                .iter()
                .zip(&indices)
                .map(|((name, values), &i)| (name.to_string(), values[i].to_string()))
                .collect();

            let inputs = base_inputs.clone().extended(
                axis_values
                    .iter()
                    .map(|(axis, value)| format!("{axis}={value}")),
            );
            let fp = fingerprint(&inputs)?;

            let shards = if template.shards > 1 {
                (1..=template.shards)
                    .map(|index| {
                        Some(ShardSlot {
                            index,
                            count: template.shards,
                        })
                    })
                    .collect()
            } else {
                vec![None]
            };

            for shard in shards {
                let mut command = template.command.clone();
                if let Some(slot) = shard {
                    command.push("--shard".to_string());
                    command.push(slot.to_string());
                }
                command.extend(template.extra_args.iter().cloned());

                specs.push(JobSpec {
                    id: JobSpec::format_id(&template.name, &axis_values, shard),
                    template: template.name.clone(),
                    axis_values: axis_values.clone(),
                    shard,
                    fingerprint: fp.clone(),
                    env_inputs: inputs.clone(),
                    kind: template.kind,
                    command,
                    requires: template.requires.clone(),
                    target: template.target.clone(),
                    timeout_secs: template.timeout_secs,
                });
            }

            exhausted = true;
            for pos in (0..axes.len()).rev() {
                indices[pos] += 1;
                if indices[pos] < axes[pos].1.len() {
                    exhausted = false;
                    break;
                }
                indices[pos] = 0;
            }
        }
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MatrixError;
    use crate::matrix::{Axis, AxisSelection, JobTemplate};

    fn base_inputs() -> EnvironmentInputs {
        EnvironmentInputs::new(["base-layer-rev-42"])
    }

    fn two_axis_matrix() -> Matrix {
        Matrix::new(
            vec![
                Axis::new("interpreter", ["3.10", "3.11"]),
                Axis::new("os", ["linux", "macos"]),
            ],
            vec![JobTemplate::new(
                "unit",
                &["interpreter", "os"],
                vec!["run-tests".to_string()],
            )],
        )
    }

    #[test]
    fn test_cartesian_product_size_and_order() {
        let specs = expand(&two_axis_matrix(), &base_inputs()).unwrap();
        assert_eq!(specs.len(), 4);

        // interpreter varies slowest (lexicographically first axis), os fastest.
        let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "unit-interpreter=3.10-os=linux",
                "unit-interpreter=3.10-os=macos",
                "unit-interpreter=3.11-os=linux",
                "unit-interpreter=3.11-os=macos",
            ]
        );
    }

    #[test]
    fn test_shards_emit_each_index_exactly_once() {
        let mut matrix = two_axis_matrix();
        matrix.templates[0] = matrix.templates[0].clone().with_shards(3);

        let specs = expand(&matrix, &base_inputs()).unwrap();
        assert_eq!(specs.len(), 12);

        for chunk in specs.chunks(3) {
            let indices: Vec<u32> = chunk.iter().map(|s| s.shard.unwrap().index).collect();
            assert_eq!(indices, vec![1, 2, 3]);
            for spec in chunk {
                assert_eq!(spec.shard.unwrap().count, 3);
                assert!(spec.command.contains(&"--shard".to_string()));
            }
            // All shards of one combination share an environment.
            assert!(chunk.windows(2).all(|w| w[0].fingerprint == w[1].fingerprint));
        }
    }

    #[test]
    fn test_pinned_axis_restricts_product() {
        let mut matrix = two_axis_matrix();
        matrix.templates[0] = matrix.templates[0]
            .clone()
            .with_axis("os", AxisSelection::Only(vec!["linux".to_string()]));

        let specs = expand(&matrix, &base_inputs()).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.axis_values["os"] == "linux"));
    }

    #[test]
    fn test_zero_match_template_yields_no_specs() {
        let mut matrix = two_axis_matrix();
        matrix.templates[0] = matrix.templates[0]
            .clone()
            .with_axis("os", AxisSelection::Only(vec!["windows".to_string()]));

        let specs = expand(&matrix, &base_inputs()).unwrap();
        assert!(specs.is_empty());
    }

    #[test]
    fn test_templates_expand_in_declaration_order() {
        let mut matrix = two_axis_matrix();
        let second = JobTemplate::new("integration", &["os"], vec!["run-its".to_string()]);
        matrix.templates.push(second);

        let specs = expand(&matrix, &base_inputs()).unwrap();
        assert_eq!(specs.len(), 6);
        assert!(specs[..4].iter().all(|s| s.template == "unit"));
        assert!(specs[4..].iter().all(|s| s.template == "integration"));
    }

    #[test]
    fn test_distinct_combinations_distinct_fingerprints() {
        let specs = expand(&two_axis_matrix(), &base_inputs()).unwrap();
        for (i, a) in specs.iter().enumerate() {
            for b in &specs[i + 1..] {
                assert_ne!(a.fingerprint, b.fingerprint);
            }
        }
    }

    #[test]
    fn test_invalid_matrix_fails_before_expansion() {
        let matrix = Matrix::new(
            vec![Axis::new("os", Vec::<String>::new())],
            vec![JobTemplate::new("unit", &["os"], vec!["run-tests".to_string()])],
        );
        assert!(matches!(
            expand(&matrix, &base_inputs()),
            Err(MatrixError::EmptyAxis { .. })
        ));
    }
}
