//! RFC 5322 / RFC 2045 / RFC 2047 / RFC 2231 header field grammars.
//!
//! These parsers are usable standalone, without driving a full message
//! parse: each `parse_*` entry point takes the unfolded text of a single
//! header value.

use crate::nom_utils::{explain_nom, make_context_error, make_span, IResult, Span};
use crate::{MimeError, Result};
use charset::Charset;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::error::context;
use nom::multi::{many0, many1, separated_list1};
use nom::sequence::{delimited, preceded, separated_pair, terminated, tuple};
use std::collections::BTreeMap;

impl MimeError {
    pub(crate) fn from_nom(input: &str, err: nom::Err<crate::nom_utils::ParseError<Span>>) -> Self {
        MimeError::HeaderParse(explain_nom(input, err))
    }
}

fn is_utf8_non_ascii(c: char) -> bool {
    let c = c as u32;
    c == 0 || c >= 0x80
}

// ctl = { '\u{00}'..'\u{1f}' | "\u{7f}" }
fn is_ctl(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1f}' | '\u{7f}')
}

fn is_char(c: char) -> bool {
    matches!(c, '\u{01}'..='\u{ff}')
}

fn is_especial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '/' | '[' | ']' | '?' | '.' | '='
    )
}

fn is_token(c: char) -> bool {
    is_char(c) && c != ' ' && !is_especial(c) && !is_ctl(c)
}

// vchar = { '\u{21}'..'\u{7e}' | utf8_non_ascii }
fn is_vchar(c: char) -> bool {
    let u = c as u32;
    (0x21..=0x7e).contains(&u) || is_utf8_non_ascii(c)
}

fn is_atext(c: char) -> bool {
    match c {
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
        | '`' | '{' | '|' | '}' | '~' => true,
        c => c.is_ascii_alphanumeric() || is_utf8_non_ascii(c),
    }
}

fn atext(input: Span) -> IResult<Span, Span> {
    context("atext", take_while1(is_atext))(input)
}

fn is_obs_no_ws_ctl(c: char) -> bool {
    matches!(c, '\u{01}'..='\u{08}' | '\u{0b}'..='\u{0c}' | '\u{0e}'..='\u{1f}' | '\u{7f}')
}

// ctext plus the obsolete and utf8 extensions
fn is_ctext(c: char) -> bool {
    match c {
        '\u{21}'..='\u{27}' | '\u{2a}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

fn is_dtext(c: char) -> bool {
    match c {
        '\u{21}'..='\u{5a}' | '\u{5e}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

fn is_qtext(c: char) -> bool {
    match c {
        '\u{21}' | '\u{23}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

fn is_tspecial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
    )
}

fn is_attribute_char(c: char) -> bool {
    match c {
        ' ' | '*' | '\'' | '%' => false,
        _ => is_char(c) && !is_ctl(c) && !is_tspecial(c),
    }
}

fn wsp(input: Span) -> IResult<Span, Span> {
    context("wsp", take_while1(|c| c == ' ' || c == '\t'))(input)
}

fn newline(input: Span) -> IResult<Span, Span> {
    context("newline", recognize(preceded(opt(char('\r')), char('\n'))))(input)
}

// fws = { ((wsp* ~ "\r"? ~ "\n")* ~ wsp+) | obs_fws }
fn fws(input: Span) -> IResult<Span, Span> {
    context(
        "fws",
        alt((
            recognize(preceded(many0(preceded(many0(wsp), newline)), many1(wsp))),
            obs_fws,
        )),
    )(input)
}

// obs_fws = { wsp+ ~ ("\r"? ~ "\n" ~ wsp+)* }
fn obs_fws(input: Span) -> IResult<Span, Span> {
    context(
        "obs_fws",
        recognize(preceded(many1(wsp), preceded(newline, many1(wsp)))),
    )(input)
}

// cfws = { ( (fws? ~ comment)+ ~ fws?) | fws }
fn cfws(input: Span) -> IResult<Span, Span> {
    context(
        "cfws",
        recognize(alt((
            recognize(tuple((many1(tuple((opt(fws), comment))), opt(fws)))),
            fws,
        ))),
    )(input)
}

// comment = { "(" ~ (fws? ~ ccontent)* ~ fws? ~ ")" }
fn comment(input: Span) -> IResult<Span, Span> {
    context(
        "comment",
        recognize(tuple((
            char('('),
            many0(tuple((opt(fws), ccontent))),
            opt(fws),
            char(')'),
        ))),
    )(input)
}

// ccontent = { ctext | quoted_pair | comment | encoded_word }
fn ccontent(input: Span) -> IResult<Span, Span> {
    context(
        "ccontent",
        recognize(alt((
            recognize(satisfy(is_ctext)),
            recognize(quoted_pair),
            comment,
            recognize(encoded_word),
        ))),
    )(input)
}

fn is_quoted_pair(c: char) -> bool {
    match c {
        '\u{00}' | '\r' | '\n' | ' ' => true,
        c => is_obs_no_ws_ctl(c) || is_vchar(c),
    }
}

// quoted_pair = { ( "\\"  ~ (vchar | wsp)) | obs_qp }
fn quoted_pair(input: Span) -> IResult<Span, char> {
    context("quoted_pair", preceded(char('\\'), satisfy(is_quoted_pair)))(input)
}

// quoted_string = { cfws? ~ "\"" ~ (fws? ~ qcontent)* ~ fws? ~ "\"" ~ cfws? }
fn quoted_string(input: Span) -> IResult<Span, String> {
    let (loc, (bits, trailer)) = context(
        "quoted_string",
        delimited(
            opt(cfws),
            delimited(
                char('"'),
                tuple((many0(tuple((opt(fws), qcontent))), opt(fws))),
                char('"'),
            ),
            opt(cfws),
        ),
    )(input)?;

    let mut result = String::new();
    for (a, b) in bits {
        if let Some(a) = a {
            result.push_str(&a);
        }
        result.push(b);
    }
    if let Some(t) = trailer {
        result.push_str(&t);
    }
    Ok((loc, result))
}

// qcontent = { qtext | quoted_pair }
fn qcontent(input: Span) -> IResult<Span, char> {
    context("qcontent", alt((satisfy(is_qtext), quoted_pair)))(input)
}

// encoded_word = { "=?" ~ charset ~ ("*" ~ language)? ~ "?" ~ encoding ~ "?" ~ encoded_text ~ "?=" }
fn encoded_word(input: Span) -> IResult<Span, String> {
    let (loc, (charset, _language, _, encoding, _, text)) = context(
        "encoded_word",
        delimited(
            tag("=?"),
            tuple((
                ew_token,
                opt(preceded(char('*'), ew_token)),
                char('?'),
                ew_token,
                char('?'),
                encoded_text,
            )),
            tag("?="),
        ),
    )(input)?;

    let bytes = match *encoding.fragment() {
        "B" | "b" => data_encoding::BASE64_MIME
            .decode(text.as_bytes())
            .map_err(|err| {
                make_context_error(input, format!("encoded_word: base64 decode failed: {err:#}"))
            })?,
        "Q" | "q" => {
            quoted_printable::decode(text.replace('_', " "), quoted_printable::ParseMode::Robust)
                .map_err(|err| {
                    make_context_error(
                        input,
                        format!("encoded_word: quoted printable decode failed: {err:#}"),
                    )
                })?
        }
        encoding => {
            return Err(make_context_error(
                input,
                format!("encoded_word: invalid encoding '{encoding}', expected one of b, B, q or Q"),
            ));
        }
    };

    let charset = Charset::for_label_no_replacement(charset.as_bytes()).ok_or_else(|| {
        make_context_error(input, format!("encoded_word: unsupported charset '{charset}'"))
    })?;

    let (decoded, _malformed) = charset.decode_without_bom_handling(&bytes);

    Ok((loc, decoded.to_string()))
}

// charset / language / encoding tokens inside an encoded word
fn ew_token(input: Span) -> IResult<Span, Span> {
    context("ew_token", take_while1(|c| c != '*' && is_token(c)))(input)
}

// encoded_text = @{ (!( " " | "?") ~ vchar)+ }
fn encoded_text(input: Span) -> IResult<Span, Span> {
    context(
        "encoded_text",
        take_while1(|c| is_vchar(c) && c != ' ' && c != '?'),
    )(input)
}

// atom = { cfws? ~ atext ~ cfws? }
fn atom(input: Span) -> IResult<Span, String> {
    let (loc, text) = context("atom", delimited(opt(cfws), atext, opt(cfws)))(input)?;
    Ok((loc, text.to_string()))
}

// word = { atom | quoted_string }
fn word(input: Span) -> IResult<Span, String> {
    context("word", alt((atom, quoted_string)))(input)
}

// obs_local_part = { word ~ (dot ~ word)* }
fn obs_local_part(input: Span) -> IResult<Span, String> {
    let (loc, (first, dotted)) = context(
        "obs_local_part",
        tuple((word, many0(preceded(char('.'), word)))),
    )(input)?;
    let mut result = first;
    for w in dotted {
        result.push('.');
        result.push_str(&w);
    }
    Ok((loc, result))
}

// local_part = { dot_atom | quoted_string | obs_local_part }
fn local_part(input: Span) -> IResult<Span, String> {
    context("local_part", alt((dot_atom, quoted_string, obs_local_part)))(input)
}

// domain = { dot_atom | domain_literal | obs_domain }
fn domain(input: Span) -> IResult<Span, String> {
    context("domain", alt((dot_atom, domain_literal, obs_domain)))(input)
}

// obs_domain = { atom ~ ( dot ~ atom)* }
fn obs_domain(input: Span) -> IResult<Span, String> {
    let (loc, (first, dotted)) = context(
        "obs_domain",
        tuple((atom, many0(preceded(char('.'), atom)))),
    )(input)?;
    let mut result = first;
    for a in dotted {
        result.push('.');
        result.push_str(&a);
    }
    Ok((loc, result))
}

// domain_literal = { cfws? ~ "[" ~ (fws? ~ dtext)* ~ fws? ~ "]" ~ cfws? }
fn domain_literal(input: Span) -> IResult<Span, String> {
    let (loc, (bits, trailer)) = context(
        "domain_literal",
        delimited(
            opt(cfws),
            delimited(
                char('['),
                tuple((
                    many0(tuple((opt(fws), alt((satisfy(is_dtext), quoted_pair))))),
                    opt(fws),
                )),
                char(']'),
            ),
            opt(cfws),
        ),
    )(input)?;

    let mut result = String::new();
    result.push('[');
    for (a, b) in bits {
        if let Some(a) = a {
            result.push_str(&a);
        }
        result.push(b);
    }
    if let Some(t) = trailer {
        result.push_str(&t);
    }
    result.push(']');
    Ok((loc, result))
}

// dot_atom_text = @{ atext ~ ("." ~ atext)* }
fn dot_atom_text(input: Span) -> IResult<Span, String> {
    let (loc, (a, b)) = context(
        "dot_atom_text",
        tuple((atext, many0(preceded(char('.'), atext)))),
    )(input)?;
    let mut result = a.to_string();
    for item in b {
        result.push('.');
        result.push_str(&item);
    }
    Ok((loc, result))
}

// dot_atom = { cfws? ~ dot_atom_text ~ cfws? }
fn dot_atom(input: Span) -> IResult<Span, String> {
    context("dot_atom", delimited(opt(cfws), dot_atom_text, opt(cfws)))(input)
}

// addr_spec = { local_part ~ "@" ~ domain }
fn addr_spec(input: Span) -> IResult<Span, AddrSpec> {
    let (loc, (local_part, domain)) =
        context("addr_spec", separated_pair(local_part, char('@'), domain))(input)?;
    Ok((loc, AddrSpec { local_part, domain }))
}

// phrase = { (encoded_word | word)+ | obs_phrase }
// obs_phrase = { (encoded_word | word) ~ (encoded_word | word | dot | cfws)* }
fn phrase(input: Span) -> IResult<Span, String> {
    let (loc, (a, b)): (Span, (String, Vec<Option<String>>)) = context(
        "phrase",
        tuple((
            alt((encoded_word, word)),
            many0(alt((
                map(encoded_word, Some),
                map(word, Some),
                map(char('.'), |dot| Some(dot.to_string())),
                map(cfws, |_| None),
            ))),
        )),
    )(input)?;
    let mut result = vec![a];
    result.extend(b.into_iter().flatten());
    Ok((loc, result.join(" ")))
}

// display_name = { phrase }
fn display_name(input: Span) -> IResult<Span, String> {
    context("display_name", phrase)(input)
}

// angle_addr = { cfws? ~ "<" ~ addr_spec ~ ">" ~ cfws? | obs_angle_addr }
fn angle_addr(input: Span) -> IResult<Span, AddrSpec> {
    context(
        "angle_addr",
        alt((
            delimited(
                opt(cfws),
                delimited(char('<'), addr_spec, char('>')),
                opt(cfws),
            ),
            obs_angle_addr,
        )),
    )(input)
}

// obs_angle_addr = { cfws? ~ "<" ~ obs_route ~ addr_spec ~ ">" ~ cfws? }
fn obs_angle_addr(input: Span) -> IResult<Span, AddrSpec> {
    context(
        "obs_angle_addr",
        delimited(
            opt(cfws),
            delimited(char('<'), preceded(obs_route, addr_spec), char('>')),
            opt(cfws),
        ),
    )(input)
}

// obs_route = { obs_domain_list ~ ":" }
fn obs_route(input: Span) -> IResult<Span, Span> {
    context(
        "obs_route",
        recognize(terminated(
            tuple((
                many0(alt((cfws, recognize(char(','))))),
                recognize(char('@')),
                recognize(domain),
                many0(tuple((
                    char(','),
                    opt(cfws),
                    opt(tuple((char('@'), domain))),
                ))),
            )),
            char(':'),
        )),
    )(input)
}

// name_addr = { display_name? ~ angle_addr }
fn name_addr(input: Span) -> IResult<Span, Mailbox> {
    context(
        "name_addr",
        map(tuple((opt(display_name), angle_addr)), |(name, address)| {
            Mailbox { name, address }
        }),
    )(input)
}

// mailbox = { name_addr | addr_spec }
fn mailbox(input: Span) -> IResult<Span, Mailbox> {
    if let Ok(res) = name_addr(input) {
        Ok(res)
    } else {
        let (loc, address) = context("mailbox", addr_spec)(input)?;
        Ok((loc, Mailbox { name: None, address }))
    }
}

// mailbox_list = { (mailbox ~ ("," ~ mailbox)*) | obs_mbox_list }
fn mailbox_list(input: Span) -> IResult<Span, MailboxList> {
    let (loc, mailboxes) = context(
        "mailbox_list",
        alt((separated_list1(char(','), mailbox), obs_mbox_list)),
    )(input)?;
    Ok((loc, MailboxList(mailboxes)))
}

// obs_mbox_list = {  ((cfws? ~ ",")* ~ mailbox ~ ("," ~ (mailbox | cfws))*)+ }
fn obs_mbox_list(input: Span) -> IResult<Span, Vec<Mailbox>> {
    let (loc, entries) = context(
        "obs_mbox_list",
        many1(preceded(
            many0(preceded(opt(cfws), char(','))),
            tuple((
                mailbox,
                many0(preceded(
                    char(','),
                    alt((map(mailbox, Some), map(cfws, |_| None))),
                )),
            )),
        )),
    )(input)?;

    let mut result: Vec<Mailbox> = vec![];
    for (first, rest) in entries {
        result.push(first);
        result.extend(rest.into_iter().flatten());
    }
    Ok((loc, result))
}

// address = { mailbox | group }
fn address(input: Span) -> IResult<Span, Address> {
    context("address", alt((map(mailbox, Address::Mailbox), group)))(input)
}

// group = { display_name ~ ":" ~ group_list? ~ ";" ~ cfws? }
fn group(input: Span) -> IResult<Span, Address> {
    let (loc, (name, _, group_list, _)) = context(
        "group",
        terminated(
            tuple((display_name, char(':'), opt(group_list), char(';'))),
            opt(cfws),
        ),
    )(input)?;
    Ok((
        loc,
        Address::Group {
            name,
            entries: group_list.unwrap_or_else(|| MailboxList(vec![])),
        },
    ))
}

// group_list = { mailbox_list | cfws | obs_group_list }
fn group_list(input: Span) -> IResult<Span, MailboxList> {
    context(
        "group_list",
        alt((
            mailbox_list,
            map(cfws, |_| MailboxList(vec![])),
            obs_group_list,
        )),
    )(input)
}

// obs_group_list = @{ (cfws? ~ ",")+ ~ cfws? }
fn obs_group_list(input: Span) -> IResult<Span, MailboxList> {
    context(
        "obs_group_list",
        map(
            terminated(many1(preceded(opt(cfws), char(','))), opt(cfws)),
            |_| MailboxList(vec![]),
        ),
    )(input)
}

// address_list = { (address ~ ("," ~ address)*) | obs_addr_list }
fn address_list(input: Span) -> IResult<Span, AddressList> {
    context(
        "address_list",
        alt((
            map(separated_list1(char(','), address), AddressList),
            obs_address_list,
        )),
    )(input)
}

// obs_addr_list = {  ((cfws? ~ ",")* ~ address ~ ("," ~ (address | cfws))*)+ }
fn obs_address_list(input: Span) -> IResult<Span, AddressList> {
    let (loc, entries) = context(
        "obs_address_list",
        many1(preceded(
            many0(preceded(opt(cfws), char(','))),
            tuple((
                address,
                many0(preceded(
                    char(','),
                    alt((map(address, Some), map(cfws, |_| None))),
                )),
            )),
        )),
    )(input)?;

    let mut result: Vec<Address> = vec![];
    for (first, rest) in entries {
        result.push(first);
        result.extend(rest.into_iter().flatten());
    }
    Ok((loc, AddressList(result)))
}

fn obs_utext(input: Span) -> IResult<Span, char> {
    context(
        "obs_utext",
        satisfy(|c| c == '\u{00}' || is_obs_no_ws_ctl(c) || is_vchar(c)),
    )(input)
}

// obs_unstruct = { (( "\r"* ~ "\n"* ~ ((encoded_word | obs_utext)~ "\r"* ~ "\n"*)+) | fws)+ }
fn unstructured(input: Span) -> IResult<Span, String> {
    #[derive(Debug)]
    enum Word {
        Encoded(String),
        UText(char),
        Fws,
    }

    let (loc, words) = context(
        "unstructured",
        many0(alt((
            preceded(
                map(take_while(|c| c == '\r' || c == '\n'), |_| Word::Fws),
                terminated(
                    alt((
                        map(encoded_word, Word::Encoded),
                        map(obs_utext, Word::UText),
                    )),
                    map(take_while(|c| c == '\r' || c == '\n'), |_| Word::Fws),
                ),
            ),
            map(fws, |_| Word::Fws),
        ))),
    )(input)?;

    #[derive(Debug)]
    enum ProcessedWord {
        Encoded(String),
        Text(String),
        Fws,
    }
    let mut processed = vec![];
    for w in words {
        match w {
            Word::Encoded(p) => {
                if processed.len() >= 2
                    && matches!(processed.last(), Some(ProcessedWord::Fws))
                    && matches!(processed[processed.len() - 2], ProcessedWord::Encoded(_))
                {
                    // Fws between encoded words is elided
                    processed.pop();
                }
                processed.push(ProcessedWord::Encoded(p));
            }
            Word::Fws => {
                // Collapse runs of Fws/newline to a single Fws
                if !matches!(processed.last(), Some(ProcessedWord::Fws)) {
                    processed.push(ProcessedWord::Fws);
                }
            }
            Word::UText(c) => match processed.last_mut() {
                Some(ProcessedWord::Text(prior)) => prior.push(c),
                _ => processed.push(ProcessedWord::Text(c.to_string())),
            },
        }
    }

    let mut result = String::new();
    for word in processed {
        match word {
            ProcessedWord::Encoded(s) | ProcessedWord::Text(s) => {
                result.push_str(&s);
            }
            ProcessedWord::Fws => {
                result.push(' ');
            }
        }
    }

    Ok((loc, result))
}

/// Like `unstructured`, but leaves encoded words untouched; folding
/// whitespace still collapses to a single space.
fn unstructured_raw(input: Span) -> IResult<Span, String> {
    let (loc, pieces) = context(
        "unstructured_raw",
        many0(alt((
            map(obs_utext, Some),
            map(
                alt((fws, take_while1(|c| c == '\r' || c == '\n'))),
                |_| None,
            ),
        ))),
    )(input)?;

    let mut result = String::new();
    for piece in pieces {
        match piece {
            Some(c) => result.push(c),
            None => {
                if !result.ends_with(' ') {
                    result.push(' ');
                }
            }
        }
    }
    Ok((loc, result))
}

fn is_mime_token(c: char) -> bool {
    is_char(c) && c != ' ' && !is_ctl(c) && !is_tspecial(c)
}

// mime_token = { (!(" " | ctl | tspecials) ~ char)+ }
fn mime_token(input: Span) -> IResult<Span, Span> {
    context("mime_token", take_while1(is_mime_token))(input)
}

// RFC2045 modified by RFC2231 MIME header fields
// content_type = { cfws? ~ mime_type ~ cfws? ~ "/" ~ cfws? ~ subtype ~
//  cfws? ~ (";"? ~ cfws? ~ parameter ~ cfws?)*
// }
fn content_type(input: Span) -> IResult<Span, MimeParameters> {
    let (loc, (mime_type, _, _, _, mime_subtype, _, parameters)) = context(
        "content_type",
        preceded(
            opt(cfws),
            tuple((
                mime_token,
                opt(cfws),
                char('/'),
                opt(cfws),
                mime_token,
                opt(cfws),
                parameter_list,
            )),
        ),
    )(input)?;

    let value = format!(
        "{}/{}",
        mime_type.to_ascii_lowercase(),
        mime_subtype.to_ascii_lowercase()
    );
    Ok((loc, MimeParameters::with_params(value, parameters)))
}

// A bare token followed by optional parameters; covers
// Content-Transfer-Encoding and Content-Disposition style values.
fn parameterized(input: Span) -> IResult<Span, MimeParameters> {
    let (loc, (value, _, parameters)) = context(
        "parameterized",
        preceded(
            opt(cfws),
            tuple((mime_token, opt(cfws), parameter_list)),
        ),
    )(input)?;

    Ok((
        loc,
        MimeParameters::with_params(value.to_ascii_lowercase(), parameters),
    ))
}

// RFC 2231 originally showed examples without `;` separating parameters,
// corrected in later errata. Implementations exist that assume the `;`
// is optional, so it is optional here too.
fn parameter_list(input: Span) -> IResult<Span, Vec<MimeParameter>> {
    many0(preceded(
        preceded(opt(char(';')), opt(cfws)),
        terminated(parameter, tuple((opt(cfws), opt(char(';')), opt(cfws)))),
    ))(input)
}

// parameter = { regular_parameter | extended_parameter }
fn parameter(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "parameter",
        alt((
            regular_parameter,
            extended_param_with_charset,
            extended_param_no_charset,
        )),
    )(input)
}

fn extended_param_with_charset(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "extended_param_with_charset",
        map(
            tuple((
                attribute,
                opt(section),
                char('*'),
                opt(cfws),
                char('='),
                opt(cfws),
                opt(mime_charset),
                char('\''),
                opt(mime_language),
                char('\''),
                map(
                    recognize(many0(alt((ext_octet, take_while1(is_attribute_char))))),
                    |s: Span| s.to_string(),
                ),
            )),
            |(name, section, _, _, _, _, mime_charset, _, mime_language, _, value)| MimeParameter {
                name: name.to_ascii_lowercase(),
                section,
                mime_charset: mime_charset.map(|s| s.to_string()),
                mime_language: mime_language.map(|s| s.to_string()),
                uses_encoding: true,
                value,
            },
        ),
    )(input)
}

fn extended_param_no_charset(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "extended_param_no_charset",
        map(
            tuple((
                attribute,
                opt(section),
                opt(char('*')),
                opt(cfws),
                char('='),
                opt(cfws),
                alt((
                    quoted_string,
                    map(
                        recognize(many0(alt((ext_octet, take_while1(is_attribute_char))))),
                        |s: Span| s.to_string(),
                    ),
                )),
            )),
            |(name, section, star, _, _, _, value)| MimeParameter {
                name: name.to_ascii_lowercase(),
                section,
                mime_charset: None,
                mime_language: None,
                uses_encoding: star.is_some(),
                value,
            },
        ),
    )(input)
}

fn mime_charset(input: Span) -> IResult<Span, Span> {
    context(
        "mime_charset",
        take_while1(|c| is_mime_token(c) && c != '\''),
    )(input)
}

fn mime_language(input: Span) -> IResult<Span, Span> {
    context(
        "mime_language",
        take_while1(|c| is_mime_token(c) && c != '\''),
    )(input)
}

fn ext_octet(input: Span) -> IResult<Span, Span> {
    context(
        "ext_octet",
        recognize(tuple((
            char('%'),
            satisfy(|c| c.is_ascii_hexdigit()),
            satisfy(|c| c.is_ascii_hexdigit()),
        ))),
    )(input)
}

// section = { "*" ~ ASCII_DIGIT+ }
fn section(input: Span) -> IResult<Span, u32> {
    context("section", preceded(char('*'), nom::character::complete::u32))(input)
}

// regular_parameter = { attribute ~ cfws? ~ "=" ~ cfws? ~ value }
fn regular_parameter(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "regular_parameter",
        map(
            tuple((attribute, opt(cfws), char('='), opt(cfws), value)),
            |(name, _, _, _, value)| MimeParameter {
                name: name.to_ascii_lowercase(),
                value,
                section: None,
                uses_encoding: false,
                mime_charset: None,
                mime_language: None,
            },
        ),
    )(input)
}

// attribute = { attribute_char+ }
fn attribute(input: Span) -> IResult<Span, Span> {
    context("attribute", take_while1(is_attribute_char))(input)
}

fn value(input: Span) -> IResult<Span, String> {
    context(
        "value",
        alt((map(mime_token, |s: Span| s.to_string()), quoted_string)),
    )(input)
}

pub(crate) fn parse_with<'a, R, F>(text: &'a str, parser: F) -> Result<R>
where
    F: Fn(Span<'a>) -> IResult<'a, Span<'a>, R>,
{
    let input = make_span(text);
    let (_, result) =
        all_consuming(parser)(input).map_err(|err| MimeError::from_nom(text, err))?;
    Ok(result)
}

pub fn parse_mailbox_list(text: &str) -> Result<MailboxList> {
    parse_with(text, mailbox_list)
}

pub fn parse_mailbox(text: &str) -> Result<Mailbox> {
    parse_with(text, mailbox)
}

pub fn parse_address_list(text: &str) -> Result<AddressList> {
    parse_with(text, address_list)
}

pub fn parse_content_type(text: &str) -> Result<MimeParameters> {
    parse_with(text, content_type)
}

/// Parse a `token; attr=value; ...` style header value, such as
/// Content-Transfer-Encoding or Content-Disposition.
pub fn parse_parameterized(text: &str) -> Result<MimeParameters> {
    parse_with(text, parameterized)
}

pub fn parse_unstructured(text: &str) -> Result<String> {
    parse_with(text, unstructured)
}

pub fn parse_unstructured_raw(text: &str) -> Result<String> {
    parse_with(text, unstructured_raw)
}

/// Look up a single parameter in a parameterized header value.
/// Case-insensitive on the parameter name; returns `None` both when the
/// parameter is absent and when the value cannot be parsed at all.
pub fn lookup_parameter(raw_value: &str, name: &str) -> Option<String> {
    match parse_content_type(raw_value) {
        Ok(params) => params.get(name),
        Err(_) => parse_parameterized(raw_value).ok()?.get(name),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrSpec {
    pub local_part: String,
    pub domain: String,
}

impl AddrSpec {
    pub fn new(local_part: &str, domain: &str) -> Self {
        Self {
            local_part: local_part.to_string(),
            domain: domain.to_string(),
        }
    }

    pub fn parse(email: &str) -> Result<Self> {
        parse_with(email, addr_spec)
    }
}

impl std::fmt::Display for AddrSpec {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}@{}", self.local_part, self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: AddrSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxList(pub Vec<Mailbox>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Mailbox(Mailbox),
    Group { name: String, entries: MailboxList },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressList(pub Vec<Address>);

impl AddressList {
    /// Flatten group syntax away, yielding every mailbox in order.
    /// The group name is discarded here; callers that care about group
    /// structure can walk the `Address` entries directly.
    pub fn flatten(&self) -> Vec<Mailbox> {
        let mut result = vec![];
        for addr in &self.0 {
            match addr {
                Address::Mailbox(mbox) => result.push(mbox.clone()),
                Address::Group { entries, .. } => result.extend(entries.0.iter().cloned()),
            }
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MimeParameter {
    name: String,
    section: Option<u32>,
    mime_charset: Option<String>,
    mime_language: Option<String>,
    uses_encoding: bool,
    value: String,
}

/// A structured value with a primary token (eg: `text/plain`) and a set
/// of `name=value` parameters, with RFC 2231 continuation and charset
/// handling applied on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeParameters {
    pub value: String,
    parameters: Vec<MimeParameter>,
    decode_extended: bool,
    charset_fallback: bool,
}

impl MimeParameters {
    pub fn new(value: &str) -> Self {
        Self::with_params(value.to_string(), vec![])
    }

    fn with_params(value: String, parameters: Vec<MimeParameter>) -> Self {
        Self {
            value,
            parameters,
            decode_extended: true,
            charset_fallback: true,
        }
    }

    /// Adjust how `get` treats RFC 2231 extended values.
    /// When `decode_extended` is false, continuation sections are still
    /// concatenated in order but %-sequences and charset labels are left
    /// untouched. When `charset_fallback` is false, fragments tagged with
    /// an unrecognized charset are dropped rather than passed through.
    pub(crate) fn set_decode_mode(&mut self, decode_extended: bool, charset_fallback: bool) {
        self.decode_extended = decode_extended;
        self.charset_fallback = charset_fallback;
    }

    /// Retrieve the value for a named parameter, reassembling RFC 2231
    /// continuation sections in numeric order and decoding %-encoded
    /// sections according to the configured decode mode.
    /// When the same name (and section) appears more than once, the last
    /// occurrence wins.
    pub fn get(&self, name: &str) -> Option<String> {
        self.assemble(name, self.decode_extended, self.charset_fallback)
    }

    /// Like `get`, but never applies %-decoding or charset conversion.
    pub fn get_raw(&self, name: &str) -> Option<String> {
        self.assemble(name, false, true)
    }

    fn assemble(&self, name: &str, decode: bool, charset_fallback: bool) -> Option<String> {
        let mut by_section: BTreeMap<Option<u32>, &MimeParameter> = BTreeMap::new();
        for p in self
            .parameters
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
        {
            // Last occurrence of a given section wins
            by_section.insert(p.section, p);
        }
        if by_section.is_empty() {
            return None;
        }

        let mut mime_charset = None;
        let mut charset_known = false;
        let mut result = String::new();

        for ele in by_section.values() {
            if let Some(cset) = ele.mime_charset.as_deref() {
                mime_charset = Charset::for_label_no_replacement(cset.as_bytes());
                charset_known = mime_charset.is_some();
            }

            if !(decode && ele.uses_encoding) {
                result.push_str(&ele.value);
                continue;
            }

            let bytes = percent_unquote(&ele.value);
            match &mime_charset {
                Some(cset) => {
                    let (decoded, _malformed) = cset.decode_without_bom_handling(&bytes);
                    result.push_str(&decoded);
                }
                None if charset_fallback || charset_known => {
                    result.push_str(&String::from_utf8_lossy(&bytes));
                }
                None => {
                    // Unrecognized charset label and no fallback allowed;
                    // drop this fragment
                }
            }
        }

        Some(result)
    }

    /// Every distinct parameter name present, in first-appearance order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![];
        for p in &self.parameters {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&p.name)) {
                names.push(&p.name);
            }
        }
        names
    }

    pub fn is_multipart(&self) -> bool {
        self.value.starts_with("multipart/")
    }

    pub fn is_message(&self) -> bool {
        self.value.eq_ignore_ascii_case("message/rfc822")
            || self.value.eq_ignore_ascii_case("message/global")
    }

    pub fn is_text(&self) -> bool {
        self.value.starts_with("text/")
    }
}

fn percent_unquote(value: &str) -> Vec<u8> {
    fn push_char(c: char, bytes: &mut Vec<u8>) {
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }

    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            push_char(c, &mut bytes);
            continue;
        }
        let hi = chars.next();
        let lo = chars.next();
        match (
            hi.and_then(|c| c.to_digit(16)),
            lo.and_then(|c| c.to_digit(16)),
        ) {
            (Some(h), Some(l)) => bytes.push((h * 16 + l) as u8),
            _ => {
                // Not a valid escape; emit the original characters
                push_char('%', &mut bytes);
                if let Some(h) = hi {
                    push_char(h, &mut bytes);
                }
                if let Some(l) = lo {
                    push_char(l, &mut bytes);
                }
            }
        }
    }
    bytes
}
