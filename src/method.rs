//! HTTP method as a typed enum.
//!
//! Covers RFC 9110 standard methods, WebDAV extensions (RFC 4918 / 4791 / 3253 / 5323),
//! and `PURGE` used by nginx and Varnish for cache invalidation.
//!
//! Routes are registered against a [`Method`]; requests carry the raw method
//! string, so an unknown method simply never matches a route and is answered
//! with `405 Method Not Allowed` when the path exists.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

macro_rules! methods {
    ($($variant:ident => $wire:literal,)*) => {
        /// A known HTTP method.
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub enum Method {
            $($variant,)*
        }

        impl Method {
            /// Every known method, in declaration order.
            pub const ALL: &'static [Method] = &[$(Method::$variant,)*];

            /// Returns the uppercase wire representation (e.g. `"GET"`).
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)*
                }
            }
        }

        /// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
        impl FromStr for Method {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)*
                    _ => Err(Error::UnknownMethod(s.to_owned())),
                }
            }
        }
    };
}

methods! {
    // RFC 9110
    Connect    => "CONNECT",
    Delete     => "DELETE",
    Get        => "GET",
    Head       => "HEAD",
    Options    => "OPTIONS",
    Patch      => "PATCH",
    Post       => "POST",
    Put        => "PUT",
    Trace      => "TRACE",
    // WebDAV RFC 4918
    Copy       => "COPY",
    Lock       => "LOCK",
    Mkcol      => "MKCOL",
    Move       => "MOVE",
    Propfind   => "PROPFIND",
    Proppatch  => "PROPPATCH",
    Unlock     => "UNLOCK",
    // WebDAV extensions: CalDAV (RFC 4791), RFC 3253, RFC 5323
    Mkcalendar => "MKCALENDAR",
    Report     => "REPORT",
    Search     => "SEARCH",
    // nginx / Varnish
    Purge      => "PURGE",
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_sensitive() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert!("get".parse::<Method>().is_err());
    }

    #[test]
    fn all_round_trips_through_wire_names() {
        for m in Method::ALL {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), *m);
        }
    }
}
