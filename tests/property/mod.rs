mod canonical_hash;
