/*
 * options.rs
 *
 * Declarative command-line options, getopt_long style.
 *
 * Registered specs compile to the two things getopt_long wants: a short
 * scan string ("t::m:v" - one colon for a required argument, two for an
 * optional one) and a long-option table. The scan walks argv once, left
 * to right, GNU style: options and positionals may be mixed, `--` ends
 * option processing, a lone `-` is a positional. Long names may be
 * abbreviated to any unique prefix.
 *
 * Optional arguments: attached (`-t7`, `--test=7`) always works; when
 * nothing is attached, the next word is taken if it doesn't start with
 * '-'. So `-t 7 extra` gives the handler "7" and leaves one positional.
 *
 * At most MAX_OPTIONS specs. The next one is refused, not dropped.
 */

use tracing::debug;

use crate::error::{BootError, Result};

/// Capacity of the option table.
pub const MAX_OPTIONS: usize = 20;

/// Whether an option takes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Optional,
    Required,
}

impl Arity {
    /* getopt optstring suffix */
    const fn suffix(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Required => ":",
            Self::Optional => "::",
        }
    }

    fn from_suffix(colons: usize) -> Self {
        match colons {
            0 => Self::None,
            1 => Self::Required,
            _ => Self::Optional,
        }
    }
}

/// Called with the option's value (`None` when absent). `Err` aborts parsing.
pub type OptionHandler =
    Box<dyn FnMut(Option<&str>) -> core::result::Result<(), String> + Send + 'static>;

/// One option: short and/or long spelling, arity, and what to do with it.
///
/// ```
/// use sigboot::options::{Arity, OptionSpec};
///
/// let spec = OptionSpec::new()
///     .short('t')
///     .long("test")
///     .arity(Arity::Optional)
///     .handler(|value| {
///         println!("test = {value:?}");
///         Ok(())
///     });
/// assert_eq!(spec.name(), "--test");
/// ```
#[derive(Default)]
pub struct OptionSpec {
    short: Option<char>,
    long: Option<String>,
    arity: Option<Arity>,
    required: bool,
    handler: Option<OptionHandler>,
    seen: u32,
}

impl OptionSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    #[must_use]
    pub fn long(mut self, long: impl Into<String>) -> Self {
        self.long = Some(long.into());
        self
    }

    #[must_use]
    pub fn arity(mut self, arity: Arity) -> Self {
        self.arity = Some(arity);
        self
    }

    /// Parsing fails with `OptionMissing` unless this option appears.
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(Option<&str>) -> core::result::Result<(), String> + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Display name for messages: `--long` if there is one, else `-s`.
    #[must_use]
    pub fn name(&self) -> String {
        match (&self.long, self.short) {
            (Some(long), _) => format!("--{long}"),
            (None, Some(short)) => format!("-{short}"),
            (None, None) => "<unnamed>".to_string(),
        }
    }

    fn arity_or_default(&self) -> Arity {
        self.arity.unwrap_or(Arity::None)
    }

    fn matches(&self, name: &str) -> bool {
        self.long.as_deref() == Some(name)
            || self.short.is_some_and(|c| {
                let mut buf = [0u8; 4];
                name == c.encode_utf8(&mut buf)
            })
    }
}

/// getopt_long `struct option` equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongOption {
    pub name: String,
    pub has_arg: Arity,
    /* index into the spec table */
    pub index: usize,
}

/// Scan string plus long table, built from the registered specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledOptions {
    pub optstring: String,
    pub longopts: Vec<LongOption>,
}

impl CompiledOptions {
    /* arity from the optstring, None if c isn't in it */
    fn short_arity(&self, c: char) -> Option<Arity> {
        let mut chars = self.optstring.char_indices().peekable();
        while let Some((pos, candidate)) = chars.next() {
            let colons = self.optstring[pos + candidate.len_utf8()..]
                .chars()
                .take_while(|&ch| ch == ':')
                .count();
            if candidate == c {
                return Some(Arity::from_suffix(colons));
            }
            for _ in 0..colons {
                chars.next();
            }
        }
        None
    }

    /* exact match wins, else a unique prefix */
    fn find_long(&self, name: &str) -> Option<&LongOption> {
        if let Some(exact) = self.longopts.iter().find(|opt| opt.name == name) {
            return Some(exact);
        }
        let mut candidates = self.longopts.iter().filter(|opt| opt.name.starts_with(name));
        match (candidates.next(), candidates.next()) {
            (Some(only), None) if !name.is_empty() => Some(only),
            _ => None,
        }
    }
}

/// Registered option specs and the positionals left by the last parse.
pub struct Options {
    specs: Vec<OptionSpec>,
    remaining: std::vec::IntoIter<String>,
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            remaining: Vec::new().into_iter(),
        }
    }

    /// Record a spec. Needs a short or long name and a handler.
    pub fn add(&mut self, spec: OptionSpec) -> Result<()> {
        if spec.short.is_none() && spec.long.is_none() {
            return Err(BootError::InvalidOption(
                "neither short nor long name given".to_string(),
            ));
        }
        if spec.handler.is_none() {
            return Err(BootError::InvalidOption(format!(
                "{}: no handler given",
                spec.name()
            )));
        }
        if let Some(short) = spec.short
            && (!short.is_ascii_graphic() || short == '-' || short == ':')
        {
            return Err(BootError::InvalidOption(format!(
                "'{short}' can't be a short option"
            )));
        }
        if let Some(long) = spec.long.as_deref()
            && (long.is_empty() || long.contains('=') || long.starts_with('-'))
        {
            return Err(BootError::InvalidOption(format!(
                "'{long}' can't be a long option"
            )));
        }
        let clash = self.specs.iter().find(|existing| {
            (spec.short.is_some() && existing.short == spec.short)
                || (spec.long.is_some() && existing.long == spec.long)
        });
        if let Some(existing) = clash {
            return Err(BootError::InvalidOption(format!(
                "{} is already registered",
                existing.name()
            )));
        }
        if self.specs.len() >= MAX_OPTIONS {
            return Err(BootError::TooManyOptions(MAX_OPTIONS));
        }

        debug!(target: "sigboot", option = %spec.name(), "new option");
        self.specs.push(spec);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Build the getopt scan string and the long-option table.
    #[must_use]
    pub fn compile(&self) -> CompiledOptions {
        let mut optstring = String::new();
        let mut longopts = Vec::new();
        for (index, spec) in self.specs.iter().enumerate() {
            let arity = spec.arity_or_default();
            if let Some(short) = spec.short {
                optstring.push(short);
                optstring.push_str(arity.suffix());
            }
            if let Some(long) = &spec.long {
                longopts.push(LongOption {
                    name: long.clone(),
                    has_arg: arity,
                    index,
                });
            }
        }
        CompiledOptions {
            optstring,
            longopts,
        }
    }

    /// How many times the option named `name` (long name or short letter)
    /// appeared in the last parse.
    #[must_use]
    pub fn seen(&self, name: &str) -> Option<u32> {
        self.specs
            .iter()
            .find(|spec| spec.matches(name))
            .map(|spec| spec.seen)
    }

    /// Scan `args` (program name first) and run the handlers.
    ///
    /// Returns the number of positional arguments; fetch them with
    /// [`Options::next_argument`]. On error the positionals from any
    /// earlier parse are left as they were.
    pub fn parse<I, S>(&mut self, args: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().skip(1).map(Into::into).collect();
        let compiled = self.compile();
        for spec in &mut self.specs {
            spec.seen = 0;
        }

        let mut positionals = Vec::new();
        let mut words = args.into_iter().peekable();
        while let Some(word) = words.next() {
            if word == "--" {
                positionals.extend(words.by_ref());
                break;
            }

            if let Some(body) = word.strip_prefix("--") {
                let (name, attached) = match body.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (body, None),
                };
                let Some(long) = compiled.find_long(name) else {
                    return Err(BootError::OptionUnknown(format!("--{name}")));
                };
                let index = long.index;
                let value = match long.has_arg {
                    Arity::None => {
                        if attached.is_some() {
                            return Err(BootError::OptionUnexpectedArgument(format!(
                                "--{}",
                                long.name
                            )));
                        }
                        None
                    }
                    Arity::Required => match attached {
                        Some(value) => Some(value),
                        None => Some(words.next().ok_or_else(|| {
                            BootError::OptionArgumentMissing(format!("--{}", long.name))
                        })?),
                    },
                    Arity::Optional => {
                        attached.or_else(|| words.next_if(|next| !next.starts_with('-')))
                    }
                };
                self.invoke(index, value)?;
                continue;
            }

            if word.len() > 1 && word.starts_with('-') {
                /* cluster: -abc, -t7, -m wait */
                let cluster = &word[1..];
                for (pos, c) in cluster.char_indices() {
                    let Some(arity) = compiled.short_arity(c) else {
                        return Err(BootError::OptionUnknown(format!("-{c}")));
                    };
                    let index = self
                        .specs
                        .iter()
                        .position(|spec| spec.short == Some(c))
                        .ok_or_else(|| BootError::OptionUnknown(format!("-{c}")))?;
                    let rest = &cluster[pos + c.len_utf8()..];
                    match arity {
                        Arity::None => self.invoke(index, None)?,
                        Arity::Required => {
                            let value = if rest.is_empty() {
                                words.next().ok_or_else(|| {
                                    BootError::OptionArgumentMissing(format!("-{c}"))
                                })?
                            } else {
                                rest.to_string()
                            };
                            self.invoke(index, Some(value))?;
                            break;
                        }
                        Arity::Optional => {
                            let value = if rest.is_empty() {
                                words.next_if(|next| !next.starts_with('-'))
                            } else {
                                Some(rest.to_string())
                            };
                            self.invoke(index, value)?;
                            break;
                        }
                    }
                }
                continue;
            }

            positionals.push(word);
        }

        if let Some(missing) = self.specs.iter().find(|spec| spec.required && spec.seen == 0) {
            return Err(BootError::OptionMissing(missing.name()));
        }

        let count = positionals.len();
        debug!(target: "sigboot", positionals = count, "options parsed");
        self.remaining = positionals.into_iter();
        Ok(count)
    }

    fn invoke(&mut self, index: usize, value: Option<String>) -> Result<()> {
        let spec = &mut self.specs[index];
        spec.seen += 1;
        let name = spec.name();
        debug!(target: "sigboot", option = %name, ?value, "option found");
        let Some(handler) = spec.handler.as_mut() else {
            return Err(BootError::InvalidOption(format!("{name}: no handler given")));
        };
        handler(value.as_deref()).map_err(|reason| BootError::OptionHandlerError {
            option: name,
            reason,
        })
    }

    /// Next positional argument, left to right. `None` once exhausted.
    ///
    /// Single pass: there is no way to rewind short of parsing again.
    pub fn next_argument(&mut self) -> Option<String> {
        self.remaining.next()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
