use std::path::Path;

use log::{info, warn};

use crate::game::note::Note;

// Chart text format:
//   &bpm=150  &offset=30  &music=song.ogg  &fragments=4
//   &keynotes=  followed by grid lines; {N} switches the grid density
//   (N cells per measure), cells are comma-separated, `3` is a tap on lane
//   3 (1-based), `3h[2]` holds lane 3 for 2 grid cells, `1/5` is a chord.
//   `#` starts a comment line. The `&mousenotes=` section belongs to a
//   different minigame and is skipped.

/// A parsed chart: fixed metadata plus the note list, sorted ascending by
/// start fragment. All malformed text fails here, before a session starts.
#[derive(Clone, Debug)]
pub struct ChartData {
    pub bpm: u32,
    pub offset_ms: i32,
    pub fragments_per_beat: u32,
    pub music_file: String,
    pub notes: Vec<Note>,
}

impl ChartData {
    /// Tick interval for the driver, in whole milliseconds.
    #[inline(always)]
    pub fn ms_per_fragment(&self) -> u32 {
        60_000 / self.bpm / self.fragments_per_beat
    }

    /// Wall-clock time of a fragment, honoring the chart offset.
    pub fn fragment_time_ms(&self, fragment: usize) -> f64 {
        let fragment_ms = 60_000.0 / f64::from(self.bpm) / f64::from(self.fragments_per_beat);
        f64::from(self.offset_ms) + fragment as f64 * fragment_ms
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Metadata,
    KeyNotes,
    MouseNotes,
}

pub fn load(path: &Path) -> Result<ChartData, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot open chart '{}': {e}", path.display()))?;
    let chart = parse(&text)?;
    info!(
        "chart loaded: {} ({} bpm, {}/beat, {} notes)",
        path.display(),
        chart.bpm,
        chart.fragments_per_beat,
        chart.notes.len()
    );
    Ok(chart)
}

pub fn parse(text: &str) -> Result<ChartData, String> {
    let mut chart = ChartData {
        bpm: 120,
        offset_ms: 0,
        fragments_per_beat: 4,
        music_file: String::new(),
        notes: Vec::new(),
    };

    let mut section = Section::Metadata;
    let mut grid_fragments = 0usize;
    let mut fragment = 0usize;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('&') {
            match rest {
                "keynotes=" => {
                    section = Section::KeyNotes;
                    fragment = 0;
                    grid_fragments = grid_resolution(&chart, 4, line_no)?;
                }
                "mousenotes=" => section = Section::MouseNotes,
                _ => parse_metadata(&mut chart, rest, line_no)?,
            }
            continue;
        }

        match section {
            Section::Metadata => {
                warn!("line {line_no}: ignoring text outside any chart section");
            }
            Section::KeyNotes => {
                if let Some(density) = line.strip_prefix('{') {
                    let density = density
                        .strip_suffix('}')
                        .ok_or_else(|| format!("line {line_no}: unmatched '{{' in density"))?;
                    let density: u32 = density
                        .trim()
                        .parse()
                        .map_err(|_| format!("line {line_no}: bad density '{density}'"))?;
                    grid_fragments = grid_resolution(&chart, density, line_no)?;
                    continue;
                }
                parse_key_line(&mut chart, line, grid_fragments, &mut fragment, line_no)?;
            }
            Section::MouseNotes => {} // different minigame, not ours
        }
    }

    if chart.bpm == 0 || chart.fragments_per_beat == 0 {
        return Err("bpm and fragments per beat must be positive".into());
    }
    if chart.ms_per_fragment() == 0 {
        return Err(format!(
            "fragment duration rounds to zero ({} bpm at {} fragments/beat)",
            chart.bpm, chart.fragments_per_beat
        ));
    }

    chart.notes.sort_by_key(|n| n.start_fragment);
    Ok(chart)
}

fn parse_metadata(chart: &mut ChartData, rest: &str, line_no: usize) -> Result<(), String> {
    if let Some(v) = rest.strip_prefix("bpm=") {
        chart.bpm = v
            .trim()
            .parse()
            .map_err(|_| format!("line {line_no}: bad bpm '{v}'"))?;
    } else if let Some(v) = rest.strip_prefix("offset=") {
        chart.offset_ms = v
            .trim()
            .parse()
            .map_err(|_| format!("line {line_no}: bad offset '{v}'"))?;
    } else if let Some(v) = rest.strip_prefix("fragments=") {
        chart.fragments_per_beat = v
            .trim()
            .parse()
            .map_err(|_| format!("line {line_no}: bad fragments per beat '{v}'"))?;
    } else if let Some(v) = rest.strip_prefix("music=") {
        chart.music_file = v.trim().to_string();
    } else {
        warn!("line {line_no}: ignoring unknown metadata '&{rest}'");
    }
    Ok(())
}

/// Fragments per grid cell at the given density, `fragments_per_beat * 4`
/// grid cells spanning one four-beat measure.
fn grid_resolution(chart: &ChartData, density: u32, line_no: usize) -> Result<usize, String> {
    if density == 0 {
        return Err(format!("line {line_no}: density must be positive"));
    }
    let per_grid = (chart.fragments_per_beat * 4) / density;
    if per_grid == 0 {
        return Err(format!(
            "line {line_no}: density {density} is finer than the fragment grid"
        ));
    }
    Ok(per_grid as usize)
}

fn parse_key_line(
    chart: &mut ChartData,
    line: &str,
    grid_fragments: usize,
    fragment: &mut usize,
    line_no: usize,
) -> Result<(), String> {
    for cell in line.split(',') {
        let cell = cell.trim();
        if !cell.is_empty() {
            for token in cell.split('/') {
                parse_key_token(chart, token.trim(), *fragment, grid_fragments, line_no)?;
            }
        }
        *fragment += grid_fragments;
    }
    Ok(())
}

fn parse_key_token(
    chart: &mut ChartData,
    token: &str,
    fragment: usize,
    grid_fragments: usize,
    line_no: usize,
) -> Result<(), String> {
    if let Some((lane_str, hold_str)) = token.split_once('h') {
        let grids = hold_str
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| format!("line {line_no}: unmatched brackets in hold '{token}'"))?;
        let lane = parse_lane(lane_str, line_no)?;
        let grids: u32 = grids
            .trim()
            .parse()
            .map_err(|_| format!("line {line_no}: bad hold length '{token}'"))?;
        let hold_fragments = grids as usize * grid_fragments;
        if hold_fragments == 0 || hold_fragments > i8::MAX as usize {
            return Err(format!(
                "line {line_no}: hold '{token}' spans {hold_fragments} fragments, outside 1..={}",
                i8::MAX
            ));
        }
        chart.notes.push(Note::hold(fragment, lane, hold_fragments as i8));
    } else {
        let lane = parse_lane(token, line_no)?;
        chart.notes.push(Note::tap(fragment, lane));
    }
    Ok(())
}

/// Lanes are 1-based in chart text.
fn parse_lane(s: &str, line_no: usize) -> Result<usize, String> {
    let lane: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("line {line_no}: bad lane '{s}'"))?;
    if lane == 0 {
        return Err(format!("line {line_no}: lanes are numbered from 1"));
    }
    Ok(lane - 1)
}

#[cfg(test)]
mod tests {
    use super::parse;
    use crate::game::note::Note;

    const DEMO: &str = "\
# four lanes, two measures
&bpm=150
&fragments=4
&music=song.ogg
&offset=30
&keynotes=
{4}
1,2,3h[2],4
{8}
,1/5,,2
&mousenotes=
G1,R2
";

    #[test]
    fn parses_metadata_and_derives_fragment_timing() {
        let chart = parse(DEMO).expect("demo chart parses");
        assert_eq!(chart.bpm, 150);
        assert_eq!(chart.offset_ms, 30);
        assert_eq!(chart.fragments_per_beat, 4);
        assert_eq!(chart.music_file, "song.ogg");
        assert_eq!(chart.ms_per_fragment(), 100);
        assert_eq!(chart.fragment_time_ms(0), 30.0);
        assert_eq!(chart.fragment_time_ms(4), 430.0);
    }

    #[test]
    fn parses_taps_holds_chords_and_density_switches() {
        let chart = parse(DEMO).expect("demo chart parses");
        assert_eq!(
            chart.notes,
            vec![
                Note::tap(0, 0),
                Note::tap(4, 1),
                Note::hold(8, 2, 8), // 2 grids of 4 fragments
                Note::tap(12, 3),
                Note::tap(18, 0), // density 8: 2 fragments per grid
                Note::tap(18, 4),
                Note::tap(22, 1),
            ]
        );
    }

    #[test]
    fn mouse_notes_are_skipped_not_parsed() {
        let chart = parse(DEMO).expect("demo chart parses");
        assert!(chart.notes.iter().all(|n| n.lane <= 4));
    }

    #[test]
    fn notes_come_out_sorted_by_start_fragment() {
        let text = "&keynotes=\n{4}\n4,3,2,1\n";
        let chart = parse(text).expect("chart parses");
        let fragments: Vec<_> = chart.notes.iter().map(|n| n.start_fragment).collect();
        let mut sorted = fragments.clone();
        sorted.sort_unstable();
        assert_eq!(fragments, sorted);
    }

    #[test]
    fn malformed_text_fails_before_a_session_starts() {
        assert!(parse("&bpm=abc\n").is_err(), "non-numeric bpm");
        assert!(parse("&keynotes=\n{x}\n").is_err(), "non-numeric density");
        assert!(parse("&keynotes=\n1h[2\n").is_err(), "unmatched bracket");
        assert!(parse("&keynotes=\n0\n").is_err(), "lane zero");
        assert!(parse("&keynotes=\nq\n").is_err(), "junk token");
        assert!(parse("&bpm=0\n").is_err(), "zero bpm");
        assert!(
            parse("&fragments=4\n&keynotes=\n1h[40]\n").is_err(),
            "hold longer than a cell can encode"
        );
    }

    #[test]
    fn density_finer_than_the_fragment_grid_is_rejected() {
        assert!(parse("&fragments=1\n&keynotes=\n{8}\n1\n").is_err());
    }

    #[test]
    fn defaults_apply_when_metadata_is_absent() {
        let chart = parse("&keynotes=\n1\n").expect("minimal chart parses");
        assert_eq!(chart.bpm, 120);
        assert_eq!(chart.fragments_per_beat, 4);
        assert_eq!(chart.ms_per_fragment(), 125);
        assert_eq!(chart.notes, vec![Note::tap(0, 0)]);
    }
}
