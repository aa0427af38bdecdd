/*! Backtracking VM that executes the programs produced by the compiler.

The VM walks the program node by node, advancing the current position in
the text as nodes match. Every node that introduces a choice (alternatives,
repetitions, lookaround, etc) pushes a [`Frame`] to an explicit stack before
continuing with its first choice. When a node fails, frames are popped until
one of them has another choice to try; when the END node is reached, frames
are popped with a successful status, which discards the pending choices.

Using an explicit stack instead of recursion means that the depth of the
backtracking is bounded only by the memory limit, which is checked every
time a frame is pushed.

The loops produced for `*` applied to complex atoms are guarded against
infinite iteration: the second and later times a BACK node is reached it
fails if the position in the text is the same as the previous time.
*/

use std::cmp::Ordering;
use std::mem::size_of;

use log::*;

use crate::backtrack::instr::{
    self, Cmp, Instr, InstrParser, MAX_COMPLEX_BRACES, MAX_LIMIT, NSUBEXP,
};
use crate::backtrack::Program;
use crate::classes::CharClassifier;
use crate::errors::MatchError;
use crate::searcher::{ExternalTexts, MatchConfig, MatchResult};
use crate::text::{
    cell_len, cell_start_before, decode_char, decode_last_char, Context,
    Position, Span, TextSource, VisualMode,
};

/// Number of steps between checks for timeout and interruption.
const STEPS_PER_CHECK: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Match,
    NoMatch,
}

/// What to do after popping a frame.
enum Unwound {
    /// Continue executing at the given address.
    Resume(usize),
    /// Keep popping frames with the given status.
    Pop(Status),
}

/// A saved position. The loop guard table is not part of it, positions
/// recorded at BACK nodes last for the whole attempt.
#[derive(Debug, Default, Clone, Copy)]
struct Save {
    pos: Position,
}

/// Last position seen at a BACK node.
struct BackPos {
    scan: usize,
    pos: Position,
}

/// Start and end positions of the capture groups.
#[derive(Debug, Default, Clone, Copy)]
struct Groups {
    start: [Option<Position>; NSUBEXP],
    end: [Option<Position>; NSUBEXP],
}

impl Groups {
    fn span(&self, n: usize) -> Option<Span> {
        match (self.start[n], self.end[n]) {
            (Some(start), Some(end)) => Some(Span::new(start, end.max(start))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Start(usize),
    End(usize),
    ZStart(usize),
    ZEnd(usize),
}

struct StarState {
    /// Greedy when true, lazy otherwise.
    longest: bool,
    min: u32,
    count: u32,
    /// First character of the literal that follows, if any.
    next_char: Option<char>,
    scan: usize,
    save: Save,
}

struct BehindState {
    /// False while matching what follows the lookbehind, true while
    /// looking for a match of the operand that ends at `behind_pos`.
    checking: bool,
    negative: bool,
    limit: u32,
    scan: usize,
    save: Save,
    save_after: Save,
    save_behind: Save,
    groups: Groups,
}

enum Frame {
    /// Restores a capture boundary when there's no match.
    Capture { slot: Slot, old: Option<Position> },
    /// Alternatives. `next_alt` is the node after the alternative being
    /// tried, another BRANCH if there are more alternatives.
    Branch { next_alt: Option<usize>, save: Save },
    /// Restores the state of a complex repetition when there's no match.
    BraceLimits { no: usize, min: u32, max: u32, count: u32 },
    /// Complex repetition, not matched the minimum number of times yet.
    BraceMore { no: usize, save: Save },
    /// Greedy complex repetition trying one more iteration.
    BraceLong { no: usize, scan: usize, save: Save },
    /// Lazy complex repetition trying what follows.
    BraceShort { scan: usize, save: Save },
    /// Lookahead or atomic group. `groups` is only kept for a negative
    /// lookahead, captures made by its operand are dropped on exit.
    Look { op: u8, scan: usize, save: Save, groups: Option<Box<Groups>> },
    Behind(Box<BehindState>),
    /// Simple repetition.
    Star(StarState),
}

/// Executes a [`Program`] against a [`TextSource`].
pub(crate) struct BacktrackVM<'r> {
    code: &'r [u8],
    src: &'r dyn TextSource,
    cfg: &'r MatchConfig,
    ctx: &'r Context,
    oracle: &'r dyn CharClassifier,
    multiline: bool,
    line_count: usize,
    ignore_case: bool,
    icombine: bool,
    sets_external: bool,
    /// Current line number, its content and the current column.
    lnum: usize,
    line: &'r [u8],
    col: usize,
    groups: Groups,
    zgroups: Groups,
    brace_min: [u32; MAX_COMPLEX_BRACES],
    brace_max: [u32; MAX_COMPLEX_BRACES],
    brace_count: [u32; MAX_COMPLEX_BRACES],
    /// Limits for the next BRACE_SIMPLE.
    bl_min: u32,
    bl_max: u32,
    /// Where the operand of the lookbehind being checked must end.
    behind_pos: Save,
    stack: Vec<Frame>,
    backpos: Vec<BackPos>,
    steps: u32,
}

impl<'r> BacktrackVM<'r> {
    pub fn new(
        program: &'r Program,
        src: &'r dyn TextSource,
        cfg: &'r MatchConfig,
        ctx: &'r Context,
    ) -> Self {
        Self {
            code: program.code(),
            src,
            cfg,
            ctx,
            oracle: cfg.classifier.as_ref(),
            multiline: src.is_multiline(),
            line_count: src.line_count(),
            ignore_case: program.case_override().unwrap_or(cfg.ignore_case),
            icombine: program.ignore_combining(),
            sets_external: program.sets_external(),
            lnum: 0,
            line: b"",
            col: 0,
            groups: Groups::default(),
            zgroups: Groups::default(),
            brace_min: [0; MAX_COMPLEX_BRACES],
            brace_max: [0; MAX_COMPLEX_BRACES],
            brace_count: [0; MAX_COMPLEX_BRACES],
            bl_min: 0,
            bl_max: 0,
            behind_pos: Save::default(),
            stack: Vec::new(),
            backpos: Vec::new(),
            steps: 0,
        }
    }

    /// Whether case is ignored, taking `\c` and `\C` into account.
    #[inline]
    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Tries to match the program at exactly the given position.
    pub fn try_at(
        &mut self,
        start: Position,
    ) -> Result<Option<MatchResult>, MatchError> {
        self.groups = Groups::default();
        self.zgroups = Groups::default();
        self.brace_count = [0; MAX_COMPLEX_BRACES];
        self.behind_pos = Save::default();
        self.stack.clear();
        self.backpos.clear();
        self.lnum = start.line;
        self.line = self.getline(start.line);
        self.col = start.col;

        if !self.regmatch(0)? {
            return Ok(None);
        }

        let match_start = self.groups.start[0].unwrap_or(start);
        let match_end = self.groups.end[0].unwrap_or(self.pos()).max(match_start);

        let mut groups = [None; NSUBEXP];
        let mut external = [None; NSUBEXP];
        for n in 1..NSUBEXP {
            groups[n] = self.groups.span(n);
            external[n] = self.zgroups.span(n);
        }

        // Only external groups within a single line are kept.
        let mut external_texts = ExternalTexts::default();
        if self.sets_external {
            for (n, span) in external.iter().enumerate() {
                if let Some(span) = span {
                    if let Some(range) = span.range() {
                        if let Some(text) = self.getline(span.start.line).get(range) {
                            external_texts.set(n, text);
                        }
                    }
                }
            }
        }

        Ok(Some(MatchResult {
            span: Span::new(match_start, match_end),
            groups,
            external,
            external_texts,
        }))
    }

    /// Returns the line with the given number. Lines past the end of the
    /// source are empty.
    #[inline]
    fn getline(&self, lnum: usize) -> &'r [u8] {
        if lnum < self.line_count {
            self.src.line(lnum)
        } else {
            b""
        }
    }

    #[inline]
    fn pos(&self) -> Position {
        Position::new(self.lnum, self.col)
    }

    /// The current line from the current position to its end.
    #[inline]
    fn rest(&self) -> &'r [u8] {
        self.line.get(self.col..).unwrap_or_default()
    }

    #[inline]
    fn save(&self) -> Save {
        Save { pos: self.pos() }
    }

    fn restore(&mut self, save: &Save) {
        self.goto(save.pos);
    }

    fn goto(&mut self, pos: Position) {
        if pos.line != self.lnum {
            self.lnum = pos.line;
            self.line = self.getline(pos.line);
        }
        self.col = pos.col;
    }

    fn next_line(&mut self) {
        self.lnum += 1;
        self.line = self.getline(self.lnum);
        self.col = 0;
    }

    fn push(&mut self, frame: Frame) -> Result<(), MatchError> {
        let used = (self.stack.len() + 1) * size_of::<Frame>()
            + self.backpos.len() * size_of::<BackPos>();
        if used >= self.cfg.max_mem {
            return Err(MatchError::TooExpensive);
        }
        self.stack.push(frame);
        Ok(())
    }

    #[inline]
    fn tick(&mut self) -> Result<(), MatchError> {
        self.steps += 1;
        if self.steps >= STEPS_PER_CHECK {
            self.steps = 0;
            self.cfg.check_abort()?;
        }
        Ok(())
    }

    fn corrupted(&self, addr: usize) -> MatchError {
        error!("corrupted program at {:#x}", addr);
        if cfg!(debug_assertions) {
            panic!("corrupted program at {:#x}", addr);
        }
        MatchError::Corrupted { addr }
    }

    fn decode(&self, addr: usize) -> Result<Instr<'r>, MatchError> {
        InstrParser::decode_instr(self.code, addr)
            .map(|(instr, _)| instr)
            .ok_or_else(|| self.corrupted(addr))
    }

    fn group(&self, n: u8, addr: usize) -> Result<usize, MatchError> {
        let n = n as usize;
        if n < NSUBEXP {
            Ok(n)
        } else {
            Err(self.corrupted(addr))
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<Position> {
        match slot {
            Slot::Start(n) => &mut self.groups.start[n],
            Slot::End(n) => &mut self.groups.end[n],
            Slot::ZStart(n) => &mut self.zgroups.start[n],
            Slot::ZEnd(n) => &mut self.zgroups.end[n],
        }
    }

    fn set_capture(&mut self, slot: Slot) -> Result<(), MatchError> {
        let pos = self.pos();
        let old = *self.slot_mut(slot);
        self.push(Frame::Capture { slot, old })?;
        *self.slot_mut(slot) = Some(pos);
        Ok(())
    }

    /// Runs the program starting at `start` until a match is found or all
    /// the choices are exhausted.
    fn regmatch(&mut self, start: usize) -> Result<bool, MatchError> {
        let mut status = self.run(start)?;
        while let Some(frame) = self.stack.pop() {
            status = match self.unwind(frame, status)? {
                Unwound::Resume(addr) => self.run(addr)?,
                Unwound::Pop(status) => status,
            };
        }
        Ok(status == Status::Match)
    }

    /// Executes nodes starting at `scan` until reaching the END node or a
    /// node that doesn't match.
    fn run(&mut self, mut scan: usize) -> Result<Status, MatchError> {
        loop {
            self.tick()?;

            let instr = self.decode(scan)?;
            let mut next = instr::next(self.code, scan);

            match instr {
                Instr::End => return Ok(Status::Match),
                Instr::Nothing | Instr::NOpen | Instr::NClose => {}
                Instr::Bol
                | Instr::Eol
                | Instr::Bow
                | Instr::Eow
                | Instr::Bof
                | Instr::Eof
                | Instr::Cursor
                | Instr::Mark { .. }
                | Instr::Visual
                | Instr::LNum(_)
                | Instr::Col(_)
                | Instr::VCol(_) => {
                    if !self.check_assertion(&instr) {
                        return Ok(Status::NoMatch);
                    }
                }
                Instr::BhPos => {
                    if self.pos() != self.behind_pos.pos {
                        return Ok(Status::NoMatch);
                    }
                }
                Instr::Any { .. }
                | Instr::Class { .. }
                | Instr::AnyOf(_)
                | Instr::Newl => {
                    if !self.match_one(&instr) {
                        return Ok(Status::NoMatch);
                    }
                }
                Instr::Exactly(literal) => {
                    if !literal.is_empty() {
                        let len = match self.compare(literal, self.rest()) {
                            Some(len) => len,
                            None => return Ok(Status::NoMatch),
                        };
                        // A composing character after the literal makes it
                        // a different character, unless `\Z` or `\%C` says
                        // otherwise.
                        let composing_follows = decode_char(self.line, self.col + len)
                            .is_some_and(|(c, _)| self.oracle.is_composing(c));
                        if composing_follows
                            && !self.icombine
                            && next.and_then(|n| self.code.get(n).copied())
                                != Some(Instr::RE_COMPOSING)
                        {
                            return Ok(Status::NoMatch);
                        }
                        self.col += len;
                    }
                }
                Instr::Composing => {
                    while let Some((c, len)) = decode_char(self.line, self.col) {
                        if !self.oracle.is_composing(c) {
                            break;
                        }
                        self.col += len;
                    }
                }
                Instr::Back => {
                    let pos = self.pos();
                    match self.backpos.iter_mut().find(|bp| bp.scan == scan) {
                        Some(bp) if bp.pos == pos => return Ok(Status::NoMatch),
                        Some(bp) => bp.pos = pos,
                        None => self.backpos.push(BackPos { scan, pos }),
                    }
                }
                Instr::MOpen(n) => {
                    self.set_capture(Slot::Start(self.group(n, scan)?))?
                }
                Instr::MClose(n) => {
                    self.set_capture(Slot::End(self.group(n, scan)?))?
                }
                Instr::ZOpen(n) => {
                    self.set_capture(Slot::ZStart(self.group(n, scan)?))?
                }
                Instr::ZClose(n) => {
                    self.set_capture(Slot::ZEnd(self.group(n, scan)?))?
                }
                Instr::BackRef(n) => {
                    if !self.match_backref(self.group(n, scan)?) {
                        return Ok(Status::NoMatch);
                    }
                }
                Instr::ZRef(n) => {
                    // An external group that was not set matches the empty
                    // string.
                    if let Some(text) = self.cfg.external.get(self.group(n, scan)?) {
                        match self.compare(text, self.rest()) {
                            Some(len) => self.col += len,
                            None => return Ok(Status::NoMatch),
                        }
                    }
                }
                Instr::Branch => {
                    let has_choice = match next {
                        Some(n) => self.code.get(n) == Some(&Instr::BRANCH),
                        None => false,
                    };
                    if has_choice {
                        let save = self.save();
                        self.push(Frame::Branch { next_alt: next, save })?;
                    }
                    next = Some(instr::operand(self.code, scan));
                }
                Instr::BraceLimits { min, max } => {
                    let target = match next {
                        Some(n) => self.decode(n)?,
                        None => return Err(self.corrupted(scan)),
                    };
                    match target {
                        Instr::BraceSimple => {
                            self.bl_min = min;
                            self.bl_max = max;
                        }
                        Instr::BraceComplex(no) if (no as usize) < MAX_COMPLEX_BRACES => {
                            let no = no as usize;
                            self.push(Frame::BraceLimits {
                                no,
                                min: self.brace_min[no],
                                max: self.brace_max[no],
                                count: self.brace_count[no],
                            })?;
                            self.brace_min[no] = min;
                            self.brace_max[no] = max;
                            self.brace_count[no] = 0;
                        }
                        _ => return Err(self.corrupted(scan)),
                    }
                }
                Instr::BraceComplex(no) => {
                    let no = no as usize;
                    if no >= MAX_COMPLEX_BRACES {
                        return Err(self.corrupted(scan));
                    }
                    self.brace_count[no] += 1;
                    let min = self.brace_min[no];
                    let max = self.brace_max[no];
                    let count = self.brace_count[no];

                    if count <= min.min(max) {
                        // Not matched enough times yet, try one more.
                        let save = self.save();
                        self.push(Frame::BraceMore { no, save })?;
                        next = Some(instr::operand(self.code, scan));
                    } else if min <= max {
                        // Greedy, try one more before what follows.
                        if count <= max {
                            let save = self.save();
                            self.push(Frame::BraceLong { no, scan, save })?;
                            next = Some(instr::operand(self.code, scan));
                        }
                    } else if count <= min {
                        // Lazy, try what follows before one more.
                        let save = self.save();
                        self.push(Frame::BraceShort { scan, save })?;
                    }
                }
                Instr::Star | Instr::Plus | Instr::BraceSimple => {
                    let (min, max) = match instr {
                        Instr::Star => (0, MAX_LIMIT),
                        Instr::Plus => (1, MAX_LIMIT),
                        _ => (self.bl_min, self.bl_max),
                    };
                    // When the range is backwards the minimum number of
                    // repetitions is `max`.
                    let count =
                        self.regrepeat(instr::operand(self.code, scan), max)?;
                    let enough =
                        if min <= max { count >= min } else { count >= max };
                    if !enough {
                        return Ok(Status::NoMatch);
                    }
                    let next_char = match next {
                        Some(n) if !self.icombine => match self.decode(n)? {
                            Instr::Exactly(literal) => {
                                decode_char(literal, 0).map(|(c, _)| c)
                            }
                            _ => None,
                        },
                        _ => None,
                    };
                    let mut star = StarState {
                        longest: min <= max,
                        min,
                        count,
                        next_char,
                        scan,
                        save: self.save(),
                    };
                    match self.star_next(&mut star, true)? {
                        Some(addr) => {
                            self.push(Frame::Star(star))?;
                            next = Some(addr);
                        }
                        None => return Ok(Status::NoMatch),
                    }
                }
                Instr::Match | Instr::NoMatch | Instr::SubPat => {
                    let op = self.code[scan];
                    let save = self.save();
                    let groups = (op == Instr::NOMATCH)
                        .then(|| Box::new(self.groups));
                    self.push(Frame::Look { op, scan, save, groups })?;
                    next = Some(instr::operand(self.code, scan));
                }
                Instr::Behind { limit, negative } => {
                    // What follows the lookbehind is matched first, the
                    // operand is checked when that succeeds.
                    let save = self.save();
                    self.push(Frame::Behind(Box::new(BehindState {
                        checking: false,
                        negative,
                        limit,
                        scan,
                        save,
                        save_after: save,
                        save_behind: self.behind_pos,
                        groups: self.groups,
                    })))?;
                }
            }

            scan = match next {
                Some(next) => next,
                None => return Err(self.corrupted(scan)),
            };
        }
    }

    /// Handles a frame popped from the stack while unwinding with `status`.
    fn unwind(
        &mut self,
        frame: Frame,
        status: Status,
    ) -> Result<Unwound, MatchError> {
        let failed = status == Status::NoMatch;

        match frame {
            Frame::Capture { slot, old } => {
                if failed {
                    *self.slot_mut(slot) = old;
                }
                Ok(Unwound::Pop(status))
            }
            Frame::Branch { next_alt, save } => {
                if !failed {
                    return Ok(Unwound::Pop(status));
                }
                self.restore(&save);
                match next_alt {
                    Some(alt) if self.code.get(alt) == Some(&Instr::BRANCH) => {
                        let save = self.save();
                        self.push(Frame::Branch {
                            next_alt: instr::next(self.code, alt),
                            save,
                        })?;
                        Ok(Unwound::Resume(instr::operand(self.code, alt)))
                    }
                    _ => Ok(Unwound::Pop(Status::NoMatch)),
                }
            }
            Frame::BraceLimits { no, min, max, count } => {
                if failed {
                    self.brace_min[no] = min;
                    self.brace_max[no] = max;
                    self.brace_count[no] = count;
                }
                Ok(Unwound::Pop(status))
            }
            Frame::BraceMore { no, save } => {
                if failed {
                    self.restore(&save);
                    self.brace_count[no] = self.brace_count[no].saturating_sub(1);
                }
                Ok(Unwound::Pop(status))
            }
            Frame::BraceLong { no, scan, save } => {
                if !failed {
                    return Ok(Unwound::Pop(status));
                }
                // Enough iterations, continue with what follows.
                self.restore(&save);
                self.brace_count[no] = self.brace_count[no].saturating_sub(1);
                match instr::next(self.code, scan) {
                    Some(next) => Ok(Unwound::Resume(next)),
                    None => Err(self.corrupted(scan)),
                }
            }
            Frame::BraceShort { scan, save } => {
                if !failed {
                    return Ok(Unwound::Pop(status));
                }
                // What follows didn't match, try one more iteration.
                self.restore(&save);
                Ok(Unwound::Resume(instr::operand(self.code, scan)))
            }
            Frame::Look { op, scan, save, groups } => {
                if let Some(groups) = groups {
                    self.groups = *groups;
                }
                let negative = op == Instr::NOMATCH;
                if failed != negative {
                    return Ok(Unwound::Pop(Status::NoMatch));
                }
                if op != Instr::SUBPAT {
                    self.restore(&save);
                }
                match instr::next(self.code, scan) {
                    Some(next) => Ok(Unwound::Resume(next)),
                    None => Err(self.corrupted(scan)),
                }
            }
            Frame::Star(mut star) => {
                if !failed {
                    return Ok(Unwound::Pop(status));
                }
                self.restore(&star.save);
                match self.star_next(&mut star, false)? {
                    Some(addr) => {
                        self.push(Frame::Star(star))?;
                        Ok(Unwound::Resume(addr))
                    }
                    None => Ok(Unwound::Pop(Status::NoMatch)),
                }
            }
            Frame::Behind(behind) => self.unwind_behind(behind, status),
        }
    }

    /// Finds the next number of repetitions to try for a simple repetition
    /// and returns the address where matching must continue, or `None` if
    /// there are no more choices. When `first` is true the current number
    /// of repetitions is tried first.
    fn star_next(
        &mut self,
        star: &mut StarState,
        mut first: bool,
    ) -> Result<Option<usize>, MatchError> {
        loop {
            if !first {
                if star.longest {
                    // Back up one character.
                    if star.count == 0 || star.count - 1 < star.min {
                        return Ok(None);
                    }
                    star.count -= 1;
                    if self.col == 0 {
                        if self.lnum == 0 {
                            return Ok(None);
                        }
                        self.lnum -= 1;
                        self.line = self.getline(self.lnum);
                        self.col = self.line.len();
                    } else {
                        self.col = cell_start_before(self.line, self.col, self.oracle)
                            .unwrap_or(0);
                    }
                } else {
                    // The range is backwards, so `min` is the upper bound.
                    if star.count == star.min
                        || self.regrepeat(instr::operand(self.code, star.scan), 1)? == 0
                    {
                        return Ok(None);
                    }
                    star.count += 1;
                }
                self.tick()?;
            }
            first = false;

            let could_match = match star.next_char {
                None => true,
                Some(c) => decode_char(self.line, self.col).is_some_and(|(t, _)| {
                    t == c
                        || (self.ignore_case
                            && self.oracle.fold(t) == self.oracle.fold(c))
                }),
            };

            if could_match {
                star.save = self.save();
                return match instr::next(self.code, star.scan) {
                    Some(next) => Ok(Some(next)),
                    None => Err(self.corrupted(star.scan)),
                };
            }
        }
    }

    fn unwind_behind(
        &mut self,
        mut behind: Box<BehindState>,
        status: Status,
    ) -> Result<Unwound, MatchError> {
        if !behind.checking {
            if status == Status::NoMatch {
                return Ok(Unwound::Pop(status));
            }
            // What follows matched, now look for a match of the operand
            // that ends where the lookbehind started, starting at that same
            // position and going back one character at a time.
            behind.save_after = self.save();
            behind.save_behind = self.behind_pos;
            self.behind_pos = behind.save;
            behind.checking = true;
            self.restore(&behind.save);
            let addr = instr::operand(self.code, behind.scan);
            self.push(Frame::Behind(behind))?;
            return Ok(Unwound::Resume(addr));
        }

        if status == Status::Match && self.pos() == self.behind_pos.pos {
            self.behind_pos = behind.save_behind;
            return if behind.negative {
                // What follows matched, but the groups it set must go.
                self.groups = behind.groups;
                Ok(Unwound::Pop(Status::NoMatch))
            } else {
                self.restore(&behind.save_after);
                Ok(Unwound::Pop(Status::Match))
            };
        }

        let limit = behind.limit as i64;
        let mut can_go_back = true;

        if self.multiline {
            let saved = behind.save.pos;
            let target = self.behind_pos.pos;
            let end = if saved.line < target.line {
                self.line.len()
            } else {
                target.col
            };
            if limit > 0 && end as i64 - saved.col as i64 >= limit {
                can_go_back = false;
            } else if saved.col == 0 {
                // May go back to the previous line once.
                if saved.line < target.line || saved.line == 0 {
                    can_go_back = false;
                } else {
                    behind.save.pos.line -= 1;
                    self.restore(&behind.save);
                    behind.save.pos.col = self.line.len();
                }
            } else {
                let line = self.getline(saved.line);
                behind.save.pos.col =
                    cell_start_before(line, saved.col, self.oracle).unwrap_or(0);
            }
        } else if behind.save.pos.col == 0 {
            can_go_back = false;
        } else {
            let line = self.getline(behind.save.pos.line);
            behind.save.pos.col =
                cell_start_before(line, behind.save.pos.col, self.oracle)
                    .unwrap_or(0);
            let distance =
                self.behind_pos.pos.col as i64 - behind.save.pos.col as i64;
            if limit > 0 && distance > limit {
                can_go_back = false;
            }
        }

        if can_go_back {
            self.restore(&behind.save);
            if status == Status::Match {
                self.groups = behind.groups;
            }
            let addr = instr::operand(self.code, behind.scan);
            self.push(Frame::Behind(behind))?;
            return Ok(Unwound::Resume(addr));
        }

        self.behind_pos = behind.save_behind;
        if behind.negative {
            self.restore(&behind.save_after);
            Ok(Unwound::Pop(Status::Match))
        } else {
            if status == Status::Match {
                self.groups = behind.groups;
            }
            Ok(Unwound::Pop(Status::NoMatch))
        }
    }

    /// Matches the operand of a simple repetition at most `max` times and
    /// returns the number of times it matched.
    fn regrepeat(&mut self, operand: usize, max: u32) -> Result<u32, MatchError> {
        let instr = self.decode(operand)?;
        let mut count = 0;
        while count < max {
            let before = self.pos();
            if !self.match_one(&instr) || self.pos() == before {
                break;
            }
            count += 1;
            self.tick()?;
        }
        Ok(count)
    }

    /// Matches a node that consumes a single character or line break,
    /// advancing the current position if it matches.
    fn match_one(&mut self, instr: &Instr) -> bool {
        let nl = match instr {
            Instr::Any { nl } | Instr::Class { nl, .. } => *nl,
            Instr::AnyOf(set) => set.nl,
            Instr::Newl => true,
            _ => false,
        };

        let c = match decode_char(self.line, self.col) {
            Some((c, _)) => c,
            None => {
                // End of line. The line break after the last line leads to
                // an empty line past the end of the source.
                if nl && self.multiline && self.lnum < self.line_count {
                    self.next_line();
                    return true;
                }
                return false;
            }
        };

        let matched = match instr {
            Instr::Any { .. } => true,
            Instr::Class { class, .. } => class.matches(Some(c), self.oracle),
            Instr::AnyOf(set) => set.matches(c, self.ignore_case, self.oracle),
            Instr::Exactly(literal) => {
                return match self.compare(literal, self.rest()) {
                    Some(len) => {
                        self.col += len;
                        true
                    }
                    None => false,
                };
            }
            _ => false,
        };

        if matched {
            self.col += cell_len(self.line, self.col, self.oracle).unwrap_or(0);
        }

        matched
    }

    /// Compares `expected` with the start of `text`, returning the number
    /// of bytes of `text` that matched.
    fn compare(&self, expected: &[u8], text: &[u8]) -> Option<usize> {
        if !self.ignore_case && !self.icombine {
            return text.starts_with(expected).then_some(expected.len());
        }

        let mut e = 0;
        let mut t = 0;

        loop {
            if self.icombine {
                e = self.skip_composing(expected, e);
                t = self.skip_composing(text, t);
            }
            let (ec, elen) = match decode_char(expected, e) {
                Some(decoded) => decoded,
                None => return Some(t),
            };
            let (tc, tlen) = decode_char(text, t)?;
            let same = expected[e..e + elen] == text[t..t + tlen]
                || (self.ignore_case
                    && self.oracle.fold(ec) == self.oracle.fold(tc));
            if !same {
                return None;
            }
            e += elen;
            t += tlen;
        }
    }

    fn skip_composing(&self, s: &[u8], mut at: usize) -> usize {
        while let Some((c, len)) = decode_char(s, at) {
            if !self.oracle.is_composing(c) {
                break;
            }
            at += len;
        }
        at
    }

    /// Matches a backreference to capture group `n`, advancing the current
    /// position if it matches.
    fn match_backref(&mut self, n: usize) -> bool {
        let (start, end) = match (self.groups.start[n], self.groups.end[n]) {
            (Some(start), Some(end)) if start <= end => (start, end),
            // A group that was not set matches the empty string.
            _ => return true,
        };

        if start.line == end.line {
            let captured = self
                .getline(start.line)
                .get(start.col..end.col)
                .unwrap_or_default();
            return match self.compare(captured, self.rest()) {
                Some(len) => {
                    self.col += len;
                    true
                }
                None => false,
            };
        }

        if !self.multiline {
            return false;
        }

        // The group spans multiple lines. Each line of the group, except
        // the last one, must match the rest of a text line.
        let mut lnum = start.line;
        let mut col = start.col;

        loop {
            let line = self.getline(lnum);
            let captured = if lnum == end.line {
                line.get(col..end.col)
            } else {
                line.get(col..)
            }
            .unwrap_or_default();

            let len = match self.compare(captured, self.rest()) {
                Some(len) => len,
                None => return false,
            };

            if lnum == end.line {
                self.col += len;
                return true;
            }
            if self.col + len != self.line.len() || self.lnum + 1 >= self.line_count {
                return false;
            }

            self.next_line();
            lnum += 1;
            col = 0;
        }
    }

    /// Evaluates a zero-width assertion at the current position.
    fn check_assertion(&self, instr: &Instr) -> bool {
        match *instr {
            Instr::Bol => self.col == 0,
            Instr::Eol => self.col >= self.line.len(),
            Instr::Bow => {
                let this = match decode_char(self.line, self.col) {
                    Some((c, _)) => self.oracle.word_class(c),
                    None => return false,
                };
                this > 1 && self.prev_class() != Some(this)
            }
            Instr::Eow => {
                if self.col == 0 {
                    return false;
                }
                let this = decode_char(self.line, self.col)
                    .map_or(0, |(c, _)| self.oracle.word_class(c));
                let prev = self.prev_class().unwrap_or(0);
                this != prev && prev > 1
            }
            Instr::Bof => {
                if self.multiline {
                    self.lnum == 0
                        && self.col == 0
                        && self.ctx.first_line() <= 1
                } else {
                    self.col == 0
                }
            }
            Instr::Eof => {
                let last_line = !self.multiline
                    || self.lnum + 1 == self.line_count;
                last_line && self.col >= self.line.len()
            }
            Instr::Cursor => self.ctx.cursor() == Some(self.pos()),
            Instr::Mark { mark, cmp } => match self.ctx.mark(mark) {
                Some(mut pos) => {
                    if pos.line == self.lnum && pos.col == usize::MAX {
                        pos.col = self.line.len();
                    }
                    cmp_matches(cmp, self.pos().cmp(&pos))
                }
                None => false,
            },
            Instr::Visual => self.in_visual(),
            Instr::LNum(c) => {
                if !self.multiline {
                    return false;
                }
                let first = self.ctx.first_line();
                let n = if c.relative {
                    match self.ctx.cursor() {
                        Some(cursor) => cursor.line + first,
                        None => return false,
                    }
                } else {
                    c.n as usize
                };
                c.cmp.eval(self.lnum + first, n)
            }
            Instr::Col(c) => {
                let n = if c.relative {
                    match self.ctx.cursor() {
                        Some(cursor) => cursor.col + 1,
                        None => return false,
                    }
                } else {
                    c.n as usize
                };
                c.cmp.eval(self.col + 1, n)
            }
            Instr::VCol(c) => {
                let n = if c.relative {
                    match self.ctx.cursor() {
                        Some(cursor) => {
                            let line = self.getline(cursor.line);
                            self.ctx.virtual_col(line, cursor.col) + 1
                        }
                        None => return false,
                    }
                } else {
                    c.n as usize
                };
                c.cmp.eval(self.ctx.virtual_col(self.line, self.col) + 1, n)
            }
            _ => false,
        }
    }

    /// Word class of the character before the current position.
    fn prev_class(&self) -> Option<u8> {
        decode_last_char(self.line, self.col)
            .map(|(c, _)| self.oracle.word_class(c))
    }

    fn in_visual(&self) -> bool {
        if !self.multiline {
            return false;
        }
        let visual = match self.ctx.visual() {
            Some(visual) => visual,
            None => return false,
        };
        let (top, bot) = if visual.start <= visual.end {
            (visual.start, visual.end)
        } else {
            (visual.end, visual.start)
        };

        if self.lnum < top.line || self.lnum > bot.line {
            return false;
        }

        match visual.mode {
            VisualMode::Line => true,
            VisualMode::Char => {
                !((self.lnum == top.line && self.col < top.col)
                    || (self.lnum == bot.line
                        && self.col >= bot.col.saturating_add(1)))
            }
            VisualMode::Block => {
                let (top_start, top_end) = self.vcol_span(top);
                let (bot_start, bot_end) = self.vcol_span(bot);
                let start = top_start.min(bot_start);
                let end = if top.col == usize::MAX || bot.col == usize::MAX {
                    usize::MAX
                } else {
                    top_end.max(bot_end)
                };
                let vcol = self.ctx.virtual_col(self.line, self.col);
                start <= vcol && vcol <= end
            }
        }
    }

    /// First and last virtual columns occupied by the character at `pos`.
    fn vcol_span(&self, pos: Position) -> (usize, usize) {
        let line = self.getline(pos.line);
        let col = pos.col.min(line.len());
        let start = self.ctx.virtual_col(line, col);
        let end = match decode_char(line, col) {
            Some((_, len)) => {
                self.ctx.virtual_col(line, col + len).saturating_sub(1).max(start)
            }
            None => start,
        };
        (start, end)
    }
}

fn cmp_matches(cmp: Cmp, ord: Ordering) -> bool {
    match cmp {
        Cmp::Equal => ord == Ordering::Equal,
        Cmp::Less => ord == Ordering::Less,
        Cmp::Greater => ord == Ordering::Greater,
    }
}
