use std::cmp::Ordering;

/// Macro-averaged precision, recall and F-score for the binary labels,
/// averaging the per-class scores over both classes. A class with an empty
/// denominator scores zero.
pub fn macro_precision_recall_fscore(y_true: &[usize], y_pred: &[usize]) -> (f64, f64, f64) {
    debug_assert_eq!(y_true.len(), y_pred.len());

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut fscore_sum = 0.0;

    for class in [0usize, 1] {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t == class, p == class) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => {}
            }
        }
        let precision = if tp + fp > 0 { tp as f64 / (tp + fp) as f64 } else { 0.0 };
        let recall = if tp + fn_ > 0 { tp as f64 / (tp + fn_) as f64 } else { 0.0 };
        let fscore = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        precision_sum += precision;
        recall_sum += recall;
        fscore_sum += fscore;
    }

    (precision_sum / 2.0, recall_sum / 2.0, fscore_sum / 2.0)
}

pub fn root_mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    debug_assert_eq!(y_true.len(), y_pred.len());
    if y_true.is_empty() {
        return 0.0;
    }
    let mse = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64;
    mse.sqrt()
}

/// Indices of the `k` highest scores, found by partial selection rather than
/// a full sort. With `k >= len` every index is returned. The result is not
/// ordered.
pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    if k >= indices.len() {
        return indices;
    }
    let pivot = indices.len() - k;
    indices.select_nth_unstable_by(pivot, |&a, &b| {
        scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal)
    });
    indices.split_off(pivot)
}

/// "joe-burrow-1" -> "Joe Burrow". Identifier slugs carry a numeric
/// disambiguation suffix that display output drops.
pub fn display_player_name(player_id: &str) -> String {
    let words: Vec<&str> = player_id
        .split('-')
        .filter(|part| !part.is_empty() && !part.chars().all(|c| c.is_ascii_digit()))
        .collect();
    title_case(&words)
}

/// "LOUISIANA-STATE" -> "Louisiana State".
pub fn display_team_name(team_id: &str) -> String {
    let words: Vec<&str> = team_id.split('-').filter(|p| !p.is_empty()).collect();
    title_case(&words)
}

fn title_case(words: &[&str]) -> String {
    words
        .iter()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_macro_metrics_perfect_prediction() {
        let y_true = vec![1, 1, 0, 0];
        let y_pred = vec![1, 1, 0, 0];
        let (p, r, f) = macro_precision_recall_fscore(&y_true, &y_pred);
        assert_relative_eq!(p, 1.0);
        assert_relative_eq!(r, 1.0);
        assert_relative_eq!(f, 1.0);
    }

    #[test]
    fn test_macro_metrics_mixed_prediction() {
        // class 1: tp=1 fp=1 fn=1 -> p=0.5 r=0.5 f=0.5
        // class 0: tp=1 fp=1 fn=1 -> p=0.5 r=0.5 f=0.5
        let y_true = vec![1, 1, 0, 0];
        let y_pred = vec![1, 0, 1, 0];
        let (p, r, f) = macro_precision_recall_fscore(&y_true, &y_pred);
        assert_relative_eq!(p, 0.5);
        assert_relative_eq!(r, 0.5);
        assert_relative_eq!(f, 0.5);
    }

    #[test]
    fn test_macro_metrics_empty_class_scores_zero() {
        // nothing predicted positive, one true positive
        let y_true = vec![1, 0, 0];
        let y_pred = vec![0, 0, 0];
        let (p, _, _) = macro_precision_recall_fscore(&y_true, &y_pred);
        // class 1 precision 0 (no predictions), class 0 precision 2/3
        assert_relative_eq!(p, (2.0 / 3.0) / 2.0);
    }

    #[test]
    fn test_rmse() {
        assert_relative_eq!(root_mean_squared_error(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert_relative_eq!(root_mean_squared_error(&[0.0, 0.0], &[3.0, 4.0]), (12.5f64).sqrt());
    }

    #[test]
    fn test_top_k_selects_highest() {
        let scores = vec![0.1, 0.9, 0.5, 0.7, 0.2];
        let mut top = top_k_indices(&scores, 2);
        top.sort_unstable();
        assert_eq!(top, vec![1, 3]);
    }

    #[test]
    fn test_top_k_degenerates_to_all() {
        let scores = vec![0.3, 0.2];
        let mut top = top_k_indices(&scores, 10);
        top.sort_unstable();
        assert_eq!(top, vec![0, 1]);
        assert!(top_k_indices(&[], 10).is_empty());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(display_player_name("joe-burrow-1"), "Joe Burrow");
        assert_eq!(display_player_name("derrick-henry-2"), "Derrick Henry");
        assert_eq!(display_team_name("LOUISIANA-STATE"), "Louisiana State");
        assert_eq!(display_team_name("ALABAMA"), "Alabama");
    }
}
