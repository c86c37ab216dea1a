//! Merging of child-unit features
//!
//! Scenes never recompute features from raw records. They merge the feature
//! sets of their segments:
//! - sums and counts add up;
//! - rates divide merged sums by the merged valid duration;
//! - means are weighted by the size of the value list behind them;
//! - standard deviations use the pooled variance of the children;
//! - minima and maxima skip the `-1` marker.
//!
//! Means and pooled deviations equal what a single pass over the union of
//! the raw values would give.

use std::collections::BTreeMap;

use crate::aoi::AoiStat;
use crate::features::{
    rate, ratio_or_na, BlinkFeatures, DistanceFeatures, EventFeatures, FixationFeatures,
    PathFeatures, PupilFeatures, SaccadeFeatures, SupportCounts, UnitFeatures, NA,
};
use crate::segment::Segment;

/// A unit whose features can be merged into a parent
pub trait Unit {
    fn start(&self) -> i64;
    fn features(&self) -> &UnitFeatures;
    fn support(&self) -> &SupportCounts;
    fn aoi_stats(&self) -> &BTreeMap<String, AoiStat>;
}

impl Unit for Segment {
    fn start(&self) -> i64 {
        self.start
    }

    fn features(&self) -> &UnitFeatures {
        &self.features
    }

    fn support(&self) -> &SupportCounts {
        &self.support
    }

    fn aoi_stats(&self) -> &BTreeMap<String, AoiStat> {
        &self.aoi_stats
    }
}

/// Size, mean and standard deviation of one child value list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub n: usize,
    pub mean: f64,
    pub stddev: f64,
}

impl Moments {
    pub fn new(n: usize, mean: f64, stddev: f64) -> Self {
        Self { n, mean, stddev }
    }
}

/// `sum(n_i * mean_i) / sum(n_i)`, 0 when every list is empty
pub fn weighted_mean(parts: &[Moments]) -> f64 {
    let total: usize = parts.iter().map(|p| p.n).sum();
    if total == 0 {
        return 0.0;
    }
    parts
        .iter()
        .filter(|p| p.n > 0)
        .map(|p| p.n as f64 * p.mean)
        .sum::<f64>()
        / total as f64
}

/// Pooled sample standard deviation.
///
/// Empty lists are skipped and a NaN deviation (single value) counts as 0.
/// Falls back to 0 below two values in total.
pub fn pooled_stddev(parts: &[Moments]) -> f64 {
    let pooled_mean = weighted_mean(parts);
    let mut numerator = 0.0;
    let mut total = 0usize;
    for p in parts.iter().filter(|p| p.n > 0) {
        let sd = if p.stddev.is_nan() { 0.0 } else { p.stddev };
        let n = p.n as f64;
        numerator += (n - 1.0) * sd * sd + n * (p.mean - pooled_mean).powi(2);
        total += p.n;
    }
    if total > 1 {
        (numerator / (total - 1) as f64).sqrt()
    } else {
        0.0
    }
}

/// Smallest value that is not the `-1` marker, `-1` if none
pub fn min_ignoring_na(values: impl IntoIterator<Item = f64>) -> f64 {
    values
        .into_iter()
        .filter(|v| *v != NA && !v.is_nan())
        .reduce(f64::min)
        .unwrap_or(NA)
}

pub fn max_ignoring_na(values: impl IntoIterator<Item = f64>) -> f64 {
    values
        .into_iter()
        .filter(|v| *v != NA && !v.is_nan())
        .reduce(f64::max)
        .unwrap_or(NA)
}

/// Earliest `(time, offset)` pair with a known time, shifted by its offset
fn first_time(times: impl IntoIterator<Item = (i64, i64)>) -> i64 {
    times
        .into_iter()
        .filter(|(t, _)| *t != -1)
        .map(|(t, offset)| t + offset)
        .min()
        .unwrap_or(-1)
}

fn last_time(times: impl IntoIterator<Item = (i64, i64)>) -> i64 {
    times
        .into_iter()
        .filter(|(t, _)| *t != -1)
        .map(|(t, offset)| t + offset)
        .max()
        .unwrap_or(-1)
}

fn total(parts: &[Moments]) -> usize {
    parts.iter().map(|p| p.n).sum()
}

/// Merge the features of `children`, which must be ordered by start.
///
/// Returns the merged features with the merged support counts.
pub fn merge_features<U: Unit>(children: &[&U]) -> (UnitFeatures, SupportCounts) {
    let start = children.iter().map(|c| c.start()).min().unwrap_or(0);
    let feats: Vec<&UnitFeatures> = children.iter().map(|c| c.features()).collect();
    let supports: Vec<&SupportCounts> = children.iter().map(|c| c.support()).collect();

    let length: i64 = feats.iter().map(|f| f.length).sum();
    let length_invalid: i64 = feats.iter().map(|f| f.length_invalid).sum();
    let effective = length - length_invalid;
    let numfixations: usize = feats.iter().map(|f| f.numfixations).sum();

    let support = SupportCounts {
        numpupilsizes: supports.iter().map(|s| s.numpupilsizes).sum(),
        numpupilvelocity: supports.iter().map(|s| s.numpupilvelocity).sum(),
        numdistancedata: supports.iter().map(|s| s.numdistancedata).sum(),
        numfixdistances: supports.iter().map(|s| s.numfixdistances).sum(),
        numabsangles: supports.iter().map(|s| s.numabsangles).sum(),
        numrelangles: supports.iter().map(|s| s.numrelangles).sum(),
        saccade_stream: supports.iter().any(|s| s.saccade_stream),
        event_stream: supports.iter().any(|s| s.event_stream),
    };

    let fixations = merge_fixations(&feats);
    let saccades = merge_saccades(&feats, fixations.sumfixationduration);
    let offsets: Vec<i64> = children.iter().map(|c| c.start() - start).collect();

    let aoisequence = if feats.iter().any(|f| f.aoisequence.is_some()) {
        Some(
            feats
                .iter()
                .filter_map(|f| f.aoisequence.as_ref())
                .flatten()
                .cloned()
                .collect(),
        )
    } else {
        None
    };

    let features = UnitFeatures {
        completion_time: None,
        length,
        length_invalid,
        numsamples: feats.iter().map(|f| f.numsamples).sum(),
        numsegments: Some(children.len()),
        numfixations,
        fixationrate: rate(numfixations as f64, effective),
        fixations,
        path: merge_path(&feats, &supports, effective),
        blinks: merge_blinks(&feats, effective),
        pupil: merge_pupil(
            feats
                .iter()
                .zip(&supports)
                .map(|(f, s)| (&f.pupil, s.numpupilsizes, s.numpupilvelocity)),
        ),
        distance: merge_distance(
            feats
                .iter()
                .zip(&supports)
                .map(|(f, s)| (&f.distance, s.numdistancedata)),
        ),
        saccades,
        events: if support.event_stream {
            merge_events(&feats, &offsets, effective)
        } else {
            EventFeatures::default()
        },
        aoisequence,
    };
    (features, support)
}

fn merge_fixations(feats: &[&UnitFeatures]) -> FixationFeatures {
    let parts: Vec<Moments> = feats
        .iter()
        .map(|f| {
            Moments::new(
                f.numfixations,
                f.fixations.meanfixationduration,
                f.fixations.stddevfixationduration,
            )
        })
        .collect();
    if total(&parts) == 0 {
        return FixationFeatures::default();
    }
    FixationFeatures {
        meanfixationduration: weighted_mean(&parts),
        stddevfixationduration: pooled_stddev(&parts),
        sumfixationduration: feats
            .iter()
            .filter(|f| f.numfixations > 0)
            .map(|f| f.fixations.sumfixationduration)
            .sum(),
    }
}

fn merge_path(
    feats: &[&UnitFeatures],
    supports: &[&SupportCounts],
    effective: i64,
) -> PathFeatures {
    let pairs = || feats.iter().zip(supports.iter());
    let distances: Vec<Moments> = pairs()
        .map(|(f, s)| {
            Moments::new(s.numfixdistances, f.path.meanpathdistance, f.path.stddevpathdistance)
        })
        .collect();
    if total(&distances) == 0 {
        return PathFeatures::default();
    }
    let abs: Vec<Moments> = pairs()
        .map(|(f, s)| Moments::new(s.numabsangles, f.path.meanabspathangles, f.path.stddevabspathangles))
        .collect();
    let rel: Vec<Moments> = pairs()
        .map(|(f, s)| Moments::new(s.numrelangles, f.path.meanrelpathangles, f.path.stddevrelpathangles))
        .collect();
    let sum_of = |n: fn(&SupportCounts) -> usize, v: fn(&PathFeatures) -> f64| -> f64 {
        pairs().filter(|(_, s)| n(s) > 0).map(|(f, _)| v(&f.path)).sum()
    };
    let sum_distance = sum_of(|s| s.numfixdistances, |p| p.sumpathdistance);
    let sum_abs = sum_of(|s| s.numabsangles, |p| p.sumabspathangles);
    let sum_rel = sum_of(|s| s.numrelangles, |p| p.sumrelpathangles);

    PathFeatures {
        meanpathdistance: weighted_mean(&distances),
        sumpathdistance: sum_distance,
        stddevpathdistance: pooled_stddev(&distances),
        eyemovementvelocity: rate(sum_distance, effective),
        sumabspathangles: sum_abs,
        abspathanglesrate: rate(sum_abs, effective),
        meanabspathangles: weighted_mean(&abs),
        stddevabspathangles: pooled_stddev(&abs),
        sumrelpathangles: sum_rel,
        relpathanglesrate: rate(sum_rel, effective),
        meanrelpathangles: weighted_mean(&rel),
        stddevrelpathangles: pooled_stddev(&rel),
    }
}

fn merge_blinks(feats: &[&UnitFeatures], effective: i64) -> BlinkFeatures {
    let durations: Vec<Moments> = feats
        .iter()
        .map(|f| Moments::new(f.blinks.blinknum, f.blinks.blinkdurationmean, f.blinks.blinkdurationstd))
        .collect();
    let blinknum = total(&durations);
    if blinknum == 0 {
        return BlinkFeatures::default();
    }
    let mut blinks = BlinkFeatures {
        blinknum,
        blinkdurationtotal: feats.iter().map(|f| f.blinks.blinkdurationtotal).sum(),
        blinkdurationmean: weighted_mean(&durations),
        blinkdurationstd: pooled_stddev(&durations),
        blinkdurationmin: min_ignoring_na(feats.iter().map(|f| f.blinks.blinkdurationmin)),
        blinkdurationmax: max_ignoring_na(feats.iter().map(|f| f.blinks.blinkdurationmax)),
        blinkrate: rate(blinknum as f64, effective),
        ..BlinkFeatures::default()
    };

    // intervals between blinks of the same child only
    let intervals: Vec<Moments> = feats
        .iter()
        .map(|f| {
            Moments::new(
                f.blinks.blinknum.saturating_sub(1),
                f.blinks.blinktimedistancemean,
                f.blinks.blinktimedistancestd,
            )
        })
        .collect();
    if total(&intervals) > 0 {
        blinks.blinktimedistancemean = weighted_mean(&intervals);
        blinks.blinktimedistancestd = pooled_stddev(&intervals);
        blinks.blinktimedistancemin =
            min_ignoring_na(feats.iter().map(|f| f.blinks.blinktimedistancemin));
        blinks.blinktimedistancemax =
            max_ignoring_na(feats.iter().map(|f| f.blinks.blinktimedistancemax));
    }
    blinks
}

/// Merge pupil features given with their size and velocity counts, in
/// time order
pub fn merge_pupil<'a>(
    parts: impl IntoIterator<Item = (&'a PupilFeatures, usize, usize)>,
) -> PupilFeatures {
    let parts: Vec<(&PupilFeatures, usize, usize)> = parts.into_iter().collect();
    let sizes: Vec<Moments> = parts
        .iter()
        .map(|(p, n, _)| Moments::new(*n, p.meanpupilsize, p.stddevpupilsize))
        .collect();
    if total(&sizes) == 0 {
        return PupilFeatures::default();
    }
    let with_sizes = || parts.iter().filter(|(_, n, _)| *n > 0);
    let mut pupil = PupilFeatures {
        meanpupilsize: weighted_mean(&sizes),
        stddevpupilsize: pooled_stddev(&sizes),
        maxpupilsize: max_ignoring_na(with_sizes().map(|(p, _, _)| p.maxpupilsize)),
        minpupilsize: min_ignoring_na(with_sizes().map(|(p, _, _)| p.minpupilsize)),
        startpupilsize: with_sizes().next().map_or(NA, |(p, _, _)| p.startpupilsize),
        endpupilsize: with_sizes().last().map_or(NA, |(p, _, _)| p.endpupilsize),
        ..PupilFeatures::default()
    };

    let velocities: Vec<Moments> = parts
        .iter()
        .map(|(p, _, n)| Moments::new(*n, p.meanpupilvelocity, p.stddevpupilvelocity))
        .collect();
    if total(&velocities) > 0 {
        let with_velocities = || parts.iter().filter(|(_, _, n)| *n > 0);
        pupil.meanpupilvelocity = weighted_mean(&velocities);
        pupil.stddevpupilvelocity = pooled_stddev(&velocities);
        pupil.maxpupilvelocity = max_ignoring_na(with_velocities().map(|(p, _, _)| p.maxpupilvelocity));
        pupil.minpupilvelocity = min_ignoring_na(with_velocities().map(|(p, _, _)| p.minpupilvelocity));
    }
    pupil
}

/// Merge distance features given with their sample counts, in time order
pub fn merge_distance<'a>(
    parts: impl IntoIterator<Item = (&'a DistanceFeatures, usize)>,
) -> DistanceFeatures {
    let parts: Vec<(&DistanceFeatures, usize)> = parts.into_iter().collect();
    let moments: Vec<Moments> = parts
        .iter()
        .map(|(d, n)| Moments::new(*n, d.meandistance, d.stddevdistance))
        .collect();
    if total(&moments) == 0 {
        return DistanceFeatures::default();
    }
    let present = || parts.iter().filter(|(_, n)| *n > 0);
    DistanceFeatures {
        meandistance: weighted_mean(&moments),
        stddevdistance: pooled_stddev(&moments),
        maxdistance: max_ignoring_na(present().map(|(d, _)| d.maxdistance)),
        mindistance: min_ignoring_na(present().map(|(d, _)| d.mindistance)),
        startdistance: present().next().map_or(NA, |(d, _)| d.startdistance),
        enddistance: present().last().map_or(NA, |(d, _)| d.enddistance),
    }
}

fn merge_saccades(feats: &[&UnitFeatures], sum_fixation_duration: f64) -> SaccadeFeatures {
    let present: Vec<&SaccadeFeatures> = feats
        .iter()
        .map(|f| &f.saccades)
        .filter(|s| s.numsaccades > 0)
        .collect();
    if present.is_empty() {
        return SaccadeFeatures::default();
    }
    let moments = |mean: fn(&SaccadeFeatures) -> f64, sd: fn(&SaccadeFeatures) -> f64| -> Vec<Moments> {
        present
            .iter()
            .map(|s| Moments::new(s.numsaccades, mean(s), sd(s)))
            .collect()
    };
    let distance = moments(|s| s.meansaccadedistance, |s| s.stddevsaccadedistance);
    let duration = moments(|s| s.meansaccadeduration, |s| s.stddevsaccadeduration);
    let speed = moments(|s| s.meansaccadespeed, |s| s.stddevsaccadespeed);
    let sumsaccadeduration: f64 = present.iter().map(|s| s.sumsaccadeduration).sum();

    SaccadeFeatures {
        numsaccades: total(&distance),
        sumsaccadedistance: present.iter().map(|s| s.sumsaccadedistance).sum(),
        meansaccadedistance: weighted_mean(&distance),
        stddevsaccadedistance: pooled_stddev(&distance),
        longestsaccadedistance: max_ignoring_na(present.iter().map(|s| s.longestsaccadedistance)),
        sumsaccadeduration,
        meansaccadeduration: weighted_mean(&duration),
        stddevsaccadeduration: pooled_stddev(&duration),
        longestsaccadeduration: max_ignoring_na(present.iter().map(|s| s.longestsaccadeduration)),
        meansaccadespeed: weighted_mean(&speed),
        stddevsaccadespeed: pooled_stddev(&speed),
        maxsaccadespeed: max_ignoring_na(present.iter().map(|s| s.maxsaccadespeed)),
        minsaccadespeed: min_ignoring_na(present.iter().map(|s| s.minsaccadespeed)),
        fixationsaccadetimeratio: ratio_or_na(sum_fixation_duration, sumsaccadeduration),
    }
}

fn merge_events(feats: &[&UnitFeatures], offsets: &[i64], effective: i64) -> EventFeatures {
    let events: Vec<&EventFeatures> = feats.iter().map(|f| &f.events).collect();
    let count = |n: fn(&EventFeatures) -> usize| -> usize { events.iter().map(|e| n(e)).sum() };
    // earliest child holding the event, children being in time order
    let first = |t: fn(&EventFeatures) -> i64| -> i64 {
        events
            .iter()
            .zip(offsets)
            .find(|(e, _)| t(e) != -1)
            .map_or(-1, |(e, offset)| t(e) + offset)
    };
    let numleftclic = count(|e| e.numleftclic);
    let numrightclic = count(|e| e.numrightclic);
    let numdoubleclic = count(|e| e.numdoubleclic);
    let numkeypressed = count(|e| e.numkeypressed);

    EventFeatures {
        numevents: count(|e| e.numevents),
        numleftclic,
        numrightclic,
        numdoubleclic,
        numkeypressed,
        leftclicrate: rate(numleftclic as f64, effective),
        rightclicrate: rate(numrightclic as f64, effective),
        doubleclicrate: rate(numdoubleclic as f64, effective),
        keypressedrate: rate(numkeypressed as f64, effective),
        timetofirstleftclic: first(|e| e.timetofirstleftclic),
        timetofirstrightclic: first(|e| e.timetofirstrightclic),
        timetofirstdoubleclic: first(|e| e.timetofirstdoubleclic),
        timetofirstkeypressed: first(|e| e.timetofirstkeypressed),
    }
}

/// Merge the statistics of one AOI over the active children of a parent
/// spanning `[start, end]`.
///
/// Proportions use the parent `length` and fixation count. Times are shifted
/// to the parent start. `None` when no child is active.
pub fn merge_aoi_stats(
    stats: &[&AoiStat],
    start: i64,
    end: i64,
    length: i64,
    numfixations: usize,
) -> Option<AoiStat> {
    let active: Vec<&AoiStat> = stats.iter().copied().filter(|s| s.is_active).collect();
    let first = active.first()?;
    let mut merged = AoiStat::empty(&first.aid, start, end, &[]);
    merged.is_active = true;

    for stat in &active {
        for (aid, t) in &stat.transitions {
            merged.transitions.entry(aid.clone()).or_default().count += t.count;
        }
        merged.total_trans_from += stat.total_trans_from;
    }
    merged.normalize_transitions();

    let fixation_moments: Vec<Moments> = active
        .iter()
        .map(|s| {
            Moments::new(
                s.features.numfixations,
                s.features.meanfixationduration,
                s.features.stddevfixationduration,
            )
        })
        .collect();
    let times = |t: fn(&AoiStat) -> i64| -> Vec<(i64, i64)> {
        active.iter().map(|s| (t(s), s.starttime - start)).collect()
    };
    let by_length = |n: usize| {
        if length > 0 {
            n as f64 / length as f64
        } else {
            0.0
        }
    };

    let n = total(&fixation_moments);
    let spent: f64 = active.iter().map(|s| s.features.totaltimespent).sum();
    let count = |c: fn(&AoiStat) -> usize| -> usize { active.iter().map(|s| c(s)).sum() };

    let f = &mut merged.features;
    f.numfixations = n;
    f.totaltimespent = spent;
    f.longestfixation = max_ignoring_na(active.iter().map(|s| s.features.longestfixation));
    if n > 0 {
        f.meanfixationduration = weighted_mean(&fixation_moments);
        f.stddevfixationduration = pooled_stddev(&fixation_moments);
    }
    f.proportiontime = if length > 0 { spent / length as f64 } else { 0.0 };
    f.proportionnum = if numfixations > 0 {
        n as f64 / numfixations as f64
    } else {
        0.0
    };
    f.fixationrate = if spent > 0.0 {
        n as f64 / spent
    } else if n > 0 {
        NA
    } else {
        0.0
    };
    f.timetofirstfixation = first_time(times(|s| s.features.timetofirstfixation));
    f.timetolastfixation = last_time(times(|s| s.features.timetolastfixation));

    f.numevents = count(|s| s.features.numevents);
    f.numleftclic = count(|s| s.features.numleftclic);
    f.numrightclic = count(|s| s.features.numrightclic);
    f.numdoubleclic = count(|s| s.features.numdoubleclic);
    f.leftclicrate = by_length(f.numleftclic);
    f.rightclicrate = by_length(f.numrightclic);
    f.doubleclicrate = by_length(f.numdoubleclic);
    f.timetofirstleftclic = first_time(times(|s| s.features.timetofirstleftclic));
    f.timetofirstrightclic = first_time(times(|s| s.features.timetofirstrightclic));
    f.timetofirstdoubleclic = first_time(times(|s| s.features.timetofirstdoubleclic));
    f.timetolastleftclic = last_time(times(|s| s.features.timetolastleftclic));
    f.timetolastrightclic = last_time(times(|s| s.features.timetolastrightclic));
    f.timetolastdoubleclic = last_time(times(|s| s.features.timetolastdoubleclic));

    f.pupil = merge_pupil(active.iter().map(|s| {
        (&s.features.pupil, s.support.numpupilsizes, s.support.numpupilvelocity)
    }));
    f.distance = merge_distance(
        active
            .iter()
            .map(|s| (&s.features.distance, s.support.numdistancedata)),
    );
    merged.support = SupportCounts {
        numpupilsizes: active.iter().map(|s| s.support.numpupilsizes).sum(),
        numpupilvelocity: active.iter().map(|s| s.support.numpupilvelocity).sum(),
        numdistancedata: active.iter().map(|s| s.support.numdistancedata).sum(),
        ..SupportCounts::default()
    };
    Some(merged)
}

/// Merge the AOI statistics of `children` per AOI id. AOIs active in no
/// child are left out.
pub fn merge_child_aoi_stats<U: Unit>(
    children: &[&U],
    start: i64,
    end: i64,
    length: i64,
    numfixations: usize,
) -> BTreeMap<String, AoiStat> {
    let mut by_aid: BTreeMap<&str, Vec<&AoiStat>> = BTreeMap::new();
    for child in children {
        for (aid, stat) in child.aoi_stats() {
            by_aid.entry(aid.as_str()).or_default().push(stat);
        }
    }
    by_aid
        .into_iter()
        .filter_map(|(aid, stats)| {
            merge_aoi_stats(&stats, start, end, length, numfixations)
                .map(|merged| (aid.to_string(), merged))
        })
        .collect()
}
