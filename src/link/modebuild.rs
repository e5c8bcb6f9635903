//! Mode and kick batching.
//!
//! Enforcement frequently wants many mode changes against one channel in
//! one hook invocation. These builders accumulate changes and emit the
//! minimum number of wire lines: at most [`MAX_MODES`] mode letters per
//! line and a total length within `BUFSIZE - 3`, starting a fresh line
//! under the same header whenever either limit would be crossed.

use svs_proto::BUFSIZE;

/// Mode letters per emitted line.
pub const MAX_MODES: usize = 10;

/// Direction of a mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Add,
    Del,
}

/// Accumulates channel mode changes under one header.
pub struct ModeBuild {
    header: String,
    modebuf: String,
    parabuf: String,
    dir: Option<Dir>,
    modecount: usize,
    lines: Vec<String>,
}

impl ModeBuild {
    /// Start a builder. `header` is everything up to the mode string,
    /// e.g. `:36CAAAAAB TMODE 1000 #chan` or `:svsd MODE #chan`.
    pub fn start(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            modebuf: String::new(),
            parabuf: String::new(),
            dir: None,
            modecount: 0,
            lines: Vec::new(),
        }
    }

    fn cur_len(&self) -> usize {
        self.header.len() + 1 + self.modebuf.len() + 1 + self.parabuf.len()
    }

    fn flush(&mut self) {
        if self.modebuf.is_empty() {
            return;
        }
        let line = if self.parabuf.is_empty() {
            format!("{} {}", self.header, self.modebuf)
        } else {
            format!("{} {} {}", self.header, self.modebuf, self.parabuf.trim_end())
        };
        self.lines.push(line);
        self.modebuf.clear();
        self.parabuf.clear();
        self.dir = None;
        self.modecount = 0;
    }

    /// Queue one mode change, with its argument when parameterized.
    pub fn add(&mut self, dir: Dir, mode: char, arg: Option<&str>) {
        let arg_len = arg.map(|a| a.len() + 1).unwrap_or(0);
        if self.modecount >= MAX_MODES || self.cur_len() + arg_len + 4 > BUFSIZE - 3 {
            self.flush();
        }

        if self.dir != Some(dir) {
            self.modebuf.push(match dir {
                Dir::Add => '+',
                Dir::Del => '-',
            });
            self.dir = Some(dir);
        }

        self.modebuf.push(mode);
        self.modecount += 1;
        if let Some(arg) = arg {
            self.parabuf.push_str(arg);
            self.parabuf.push(' ');
        }
    }

    /// Emit all queued lines.
    pub fn finish(mut self) -> Vec<String> {
        self.flush();
        self.lines
    }

    /// True when nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.modebuf.is_empty() && self.lines.is_empty()
    }
}

/// Accumulates kicks against one channel with a shared reason.
pub struct KickBuild {
    source: String,
    channel: String,
    reason: String,
    targets: Vec<String>,
}

impl KickBuild {
    pub fn start(source: &str, channel: &str, reason: &str) -> Self {
        Self {
            source: source.to_string(),
            channel: channel.to_string(),
            reason: reason.to_string(),
            targets: Vec::new(),
        }
    }

    pub fn add(&mut self, target: &str) {
        self.targets.push(target.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// One KICK line per target.
    pub fn finish(self) -> Vec<String> {
        self.targets
            .into_iter()
            .map(|t| {
                format!(
                    ":{} KICK {} {} :{}",
                    self.source, self.channel, t, self.reason
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_mixed_directions() {
        let mut build = ModeBuild::start(":svs MODE #test");
        build.add(Dir::Add, 'o', Some("alice"));
        build.add(Dir::Add, 'v', Some("bob"));
        build.add(Dir::Del, 'b', Some("*!*@x.example"));
        let lines = build.finish();
        assert_eq!(lines, vec![":svs MODE #test +ov-b alice bob *!*@x.example"]);
    }

    #[test]
    fn splits_at_mode_count() {
        let mut build = ModeBuild::start(":svs MODE #test");
        for i in 0..(MAX_MODES + 2) {
            build.add(Dir::Add, 'b', Some(&format!("*!*@host{}.example", i)));
        }
        let lines = build.finish();
        assert_eq!(lines.len(), 2);

        for line in &lines {
            let modes = line.split_whitespace().nth(2).unwrap();
            let letters = modes.chars().filter(|c| *c != '+' && *c != '-').count();
            assert!(letters <= MAX_MODES);
        }
    }

    #[test]
    fn splits_at_line_length() {
        let long_host = format!("*!*@{}.example", "a".repeat(60));
        let mut build = ModeBuild::start(":svs MODE #test");
        for _ in 0..9 {
            build.add(Dir::Add, 'b', Some(&long_host));
        }
        let lines = build.finish();
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.len() <= BUFSIZE - 3, "line too long: {}", line.len());
        }
    }

    #[test]
    fn direction_reemitted_per_line() {
        let mut build = ModeBuild::start(":s MODE #c");
        for i in 0..(MAX_MODES + 1) {
            build.add(Dir::Del, 'b', Some(&format!("m{}", i)));
        }
        let lines = build.finish();
        assert!(lines[0].contains("-bbbbbbbbbb"));
        assert!(lines[1].contains("-b"));
    }

    #[test]
    fn empty_builder_emits_nothing() {
        let build = ModeBuild::start(":s MODE #c");
        assert!(build.is_empty());
        assert!(build.finish().is_empty());
    }

    #[test]
    fn kickbuild_one_line_per_target() {
        let mut kicks = KickBuild::start("36CAAAAAA", "#test", "Banned: spam");
        kicks.add("36CAAAAAB");
        kicks.add("36CAAAAAC");
        let lines = kicks.finish();
        assert_eq!(
            lines,
            vec![
                ":36CAAAAAA KICK #test 36CAAAAAB :Banned: spam",
                ":36CAAAAAA KICK #test 36CAAAAAC :Banned: spam",
            ]
        );
    }
}
