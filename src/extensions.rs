//! Extension types (`ipaddr`, `decimal`, `duration`) and the functions and
//! methods that construct and inspect them.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::error::ExprError;
use crate::types::Value;

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?)([0-9]+)\.([0-9]{1,4})$").expect("valid decimal pattern"));

const DECIMAL_SCALE: i64 = 10_000;

/// An IP address together with a prefix length. A bare address has the
/// full prefix (32 or 128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpNet {
    addr: IpAddr,
    prefix: u8,
}

impl IpNet {
    pub fn parse(text: &str) -> Result<Self, String> {
        let (addr_part, prefix_part) = match text.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (text, None),
        };
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| format!("invalid IP address `{text}`"))?;
        let max = max_prefix(&addr);
        let prefix = match prefix_part {
            Some(p) => {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) || p.len() > 3 {
                    return Err(format!("invalid prefix length in `{text}`"));
                }
                let n: u8 = p
                    .parse()
                    .map_err(|_| format!("invalid prefix length in `{text}`"))?;
                if n > max {
                    return Err(format!("prefix length {n} out of range in `{text}`"));
                }
                n
            }
            None => max,
        };
        Ok(Self { addr, prefix })
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// True when every address of `self` lies within `range`.
    pub fn is_in_range(&self, range: &IpNet) -> bool {
        if self.is_ipv4() != range.is_ipv4() || self.prefix < range.prefix {
            return false;
        }
        masked(&self.addr, range.prefix) == masked(&range.addr, range.prefix)
    }

    pub fn is_loopback(&self) -> bool {
        let range = if self.is_ipv4() { "127.0.0.0/8" } else { "::1/128" };
        IpNet::parse(range).is_ok_and(|r| self.is_in_range(&r))
    }

    pub fn is_multicast(&self) -> bool {
        let range = if self.is_ipv4() { "224.0.0.0/4" } else { "ff00::/8" };
        IpNet::parse(range).is_ok_and(|r| self.is_in_range(&r))
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    if addr.is_ipv4() { 32 } else { 128 }
}

fn masked(addr: &IpAddr, prefix: u8) -> u128 {
    let (bits, width) = match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(*v4)), 32u32),
        IpAddr::V6(v6) => (u128::from(*v6), 128u32),
    };
    let host_bits = width - u32::from(prefix);
    if host_bits >= 128 {
        0
    } else {
        (bits >> host_bits) << host_bits
    }
}

impl Display for IpNet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Fixed-point decimal with four fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Decimal(i64);

impl Decimal {
    pub fn parse(text: &str) -> Result<Self, String> {
        let caps = DECIMAL_RE
            .captures(text)
            .ok_or_else(|| format!("invalid decimal literal `{text}`"))?;
        let negative = !caps[1].is_empty();
        let overflow = || format!("decimal literal `{text}` is out of range");
        let whole: i64 = caps[2].parse().map_err(|_| overflow())?;
        let frac_digits = &caps[3];
        let frac: i64 = format!("{frac_digits:0<4}").parse().map_err(|_| overflow())?;
        let scaled = whole.checked_mul(DECIMAL_SCALE).ok_or_else(overflow)?;
        // Apply the sign before the fraction so that i64::MIN is reachable.
        let value = if negative {
            scaled.checked_neg().and_then(|w| w.checked_sub(frac))
        } else {
            scaled.checked_add(frac)
        };
        value.map(Decimal).ok_or_else(overflow)
    }
}

impl Display for Decimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = DECIMAL_SCALE as u64;
        write!(f, "{sign}{}.{:04}", abs / scale, abs % scale)
    }
}

/// A signed span of time with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(i64);

impl Duration {
    /// Parses `[-]<n>d<n>h<n>m<n>s<n>ms` where each unit is optional but
    /// units appear at most once and in that order.
    pub fn parse(text: &str) -> Result<Self, String> {
        let invalid = || format!("invalid duration literal `{text}`");
        let (negative, mut rest) = match text.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, text),
        };
        if rest.is_empty() {
            return Err(invalid());
        }
        const UNITS: [(&str, i64); 5] = [
            ("d", 86_400_000),
            ("h", 3_600_000),
            ("ms", 1),
            ("m", 60_000),
            ("s", 1_000),
        ];
        // Order in which units may appear; "ms" is matched before "m" above.
        const RANK: [&str; 5] = ["d", "h", "m", "s", "ms"];
        let mut total: i64 = 0;
        let mut last_rank: Option<usize> = None;
        while !rest.is_empty() {
            let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 {
                return Err(invalid());
            }
            let amount: i64 = rest[..digits].parse().map_err(|_| invalid())?;
            rest = &rest[digits..];
            let (unit, factor) = UNITS
                .iter()
                .find(|(u, _)| rest.starts_with(u))
                .ok_or_else(invalid)?;
            rest = &rest[unit.len()..];
            let rank = RANK.iter().position(|r| r == unit).ok_or_else(invalid)?;
            if last_rank.is_some_and(|last| rank <= last) {
                return Err(invalid());
            }
            last_rank = Some(rank);
            total = amount
                .checked_mul(*factor)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(invalid)?;
        }
        Ok(Duration(if negative { -total } else { total }))
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}ms", self.0)
    }
}

/// A value of one of the extension types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtensionValue {
    IpAddr(IpNet),
    Decimal(Decimal),
    Duration(Duration),
}

impl ExtensionValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ExtensionValue::IpAddr(_) => "ipaddr",
            ExtensionValue::Decimal(_) => "decimal",
            ExtensionValue::Duration(_) => "duration",
        }
    }

    /// The constructor that rebuilds this value from its string form.
    pub fn constructor(&self) -> ExtensionFunction {
        match self {
            ExtensionValue::IpAddr(_) => ExtensionFunction::Ip,
            ExtensionValue::Decimal(_) => ExtensionFunction::Decimal,
            ExtensionValue::Duration(_) => ExtensionFunction::Duration,
        }
    }
}

impl Display for ExtensionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ExtensionValue::IpAddr(ip) => write!(f, "{ip}"),
            ExtensionValue::Decimal(d) => write!(f, "{d}"),
            ExtensionValue::Duration(d) => write!(f, "{d}"),
        }
    }
}

/// The extension types, as named in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, StrumDisplay)]
pub enum ExtensionType {
    #[strum(serialize = "ipaddr")]
    IpAddr,
    #[strum(serialize = "decimal")]
    Decimal,
    #[strum(serialize = "duration")]
    Duration,
}

/// The result type of an extension function, for the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionReturn {
    Extension(ExtensionType),
    Bool,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, StrumDisplay, IntoStaticStr)]
pub enum ExtensionFunction {
    #[strum(serialize = "ip")]
    Ip,
    #[strum(serialize = "decimal")]
    Decimal,
    #[strum(serialize = "duration")]
    Duration,
    #[strum(serialize = "isIpv4")]
    IsIpv4,
    #[strum(serialize = "isIpv6")]
    IsIpv6,
    #[strum(serialize = "isLoopback")]
    IsLoopback,
    #[strum(serialize = "isMulticast")]
    IsMulticast,
    #[strum(serialize = "isInRange")]
    IsInRange,
    #[strum(serialize = "lessThan")]
    LessThan,
    #[strum(serialize = "lessThanOrEqual")]
    LessThanOrEqual,
    #[strum(serialize = "greaterThan")]
    GreaterThan,
    #[strum(serialize = "greaterThanOrEqual")]
    GreaterThanOrEqual,
    #[strum(serialize = "toMilliseconds")]
    ToMilliseconds,
    #[strum(serialize = "toSeconds")]
    ToSeconds,
    #[strum(serialize = "toMinutes")]
    ToMinutes,
    #[strum(serialize = "toHours")]
    ToHours,
    #[strum(serialize = "toDays")]
    ToDays,
}

impl ExtensionFunction {
    /// Constructors are called as `ip("..")`; everything else as a method.
    pub fn is_constructor(self) -> bool {
        matches!(
            self,
            ExtensionFunction::Ip | ExtensionFunction::Decimal | ExtensionFunction::Duration
        )
    }

    /// Number of arguments, counting the receiver of a method.
    pub fn arity(self) -> usize {
        match self {
            Self::IsInRange
            | Self::LessThan
            | Self::LessThanOrEqual
            | Self::GreaterThan
            | Self::GreaterThanOrEqual => 2,
            _ => 1,
        }
    }

    /// Extension type every argument (receiver included) must have.
    /// Constructors take strings and return `None` here.
    pub fn operand_type(self) -> Option<ExtensionType> {
        match self {
            Self::Ip | Self::Decimal | Self::Duration => None,
            Self::IsIpv4 | Self::IsIpv6 | Self::IsLoopback | Self::IsMulticast | Self::IsInRange => {
                Some(ExtensionType::IpAddr)
            }
            Self::LessThan
            | Self::LessThanOrEqual
            | Self::GreaterThan
            | Self::GreaterThanOrEqual => Some(ExtensionType::Decimal),
            Self::ToMilliseconds
            | Self::ToSeconds
            | Self::ToMinutes
            | Self::ToHours
            | Self::ToDays => Some(ExtensionType::Duration),
        }
    }

    pub fn return_type(self) -> ExtensionReturn {
        match self {
            Self::Ip => ExtensionReturn::Extension(ExtensionType::IpAddr),
            Self::Decimal => ExtensionReturn::Extension(ExtensionType::Decimal),
            Self::Duration => ExtensionReturn::Extension(ExtensionType::Duration),
            Self::ToMilliseconds
            | Self::ToSeconds
            | Self::ToMinutes
            | Self::ToHours
            | Self::ToDays => ExtensionReturn::Long,
            _ => ExtensionReturn::Bool,
        }
    }

    /// Build an extension value from its string form.
    pub fn construct(self, arg: &str) -> Result<ExtensionValue, String> {
        match self {
            Self::Ip => IpNet::parse(arg).map(ExtensionValue::IpAddr),
            Self::Decimal => Decimal::parse(arg).map(ExtensionValue::Decimal),
            Self::Duration => Duration::parse(arg).map(ExtensionValue::Duration),
            other => Err(format!("`{other}` is not a constructor")),
        }
    }

    pub fn call(self, args: &[Value]) -> Result<Value, ExprError> {
        if args.len() != self.arity() {
            return Err(ExprError::Extension(format!(
                "`{self}` expects {} argument(s), got {}",
                self.arity(),
                args.len()
            )));
        }

        let bool_of = |b: bool| -> Result<Value, ExprError> { Ok(Value::Bool(b)) };
        let millis = |v: &Value, per: i64| -> Result<Value, ExprError> {
            Ok(Value::Long(duration_arg(v)?.as_millis() / per))
        };
        match self {
            Self::Ip | Self::Decimal | Self::Duration => self
                .construct(args[0].as_str()?)
                .map(Value::Extension)
                .map_err(ExprError::Extension),
            Self::IsIpv4 => bool_of(ip_arg(&args[0])?.is_ipv4()),
            Self::IsIpv6 => bool_of(ip_arg(&args[0])?.is_ipv6()),
            Self::IsLoopback => bool_of(ip_arg(&args[0])?.is_loopback()),
            Self::IsMulticast => bool_of(ip_arg(&args[0])?.is_multicast()),
            Self::IsInRange => bool_of(ip_arg(&args[0])?.is_in_range(&ip_arg(&args[1])?)),
            Self::LessThan => bool_of(decimal_arg(&args[0])? < decimal_arg(&args[1])?),
            Self::LessThanOrEqual => bool_of(decimal_arg(&args[0])? <= decimal_arg(&args[1])?),
            Self::GreaterThan => bool_of(decimal_arg(&args[0])? > decimal_arg(&args[1])?),
            Self::GreaterThanOrEqual => {
                bool_of(decimal_arg(&args[0])? >= decimal_arg(&args[1])?)
            }
            Self::ToMilliseconds => millis(&args[0], 1),
            Self::ToSeconds => millis(&args[0], 1_000),
            Self::ToMinutes => millis(&args[0], 60_000),
            Self::ToHours => millis(&args[0], 3_600_000),
            Self::ToDays => millis(&args[0], 86_400_000),
        }
    }
}

fn ip_arg(value: &Value) -> Result<IpNet, ExprError> {
    match value {
        Value::Extension(ExtensionValue::IpAddr(ip)) => Ok(*ip),
        other => Err(ExprError::TypeMismatch {
            expected: "ipaddr",
            actual: other.type_name(),
        }),
    }
}

fn decimal_arg(value: &Value) -> Result<Decimal, ExprError> {
    match value {
        Value::Extension(ExtensionValue::Decimal(d)) => Ok(*d),
        other => Err(ExprError::TypeMismatch {
            expected: "decimal",
            actual: other.type_name(),
        }),
    }
}

fn duration_arg(value: &Value) -> Result<Duration, ExprError> {
    match value {
        Value::Extension(ExtensionValue::Duration(d)) => Ok(*d),
        other => Err(ExprError::TypeMismatch {
            expected: "duration",
            actual: other.type_name(),
        }),
    }
}
