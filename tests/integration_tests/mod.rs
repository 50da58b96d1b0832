mod reduced_basis;
